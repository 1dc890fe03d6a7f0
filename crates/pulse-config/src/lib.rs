pub mod global;
pub mod loader;
pub mod source;

pub use global::{
    AlertingConfig, AnalyzerConfig, ApiConfig, EventBusConfig, GlobalConfig, IndicatorConfig, IngestionConfig,
    LoggingConfig, MetricsConfig, StorageGlobalConfig, SystemConfig,
};
pub use loader::ConfigLoader;
pub use source::{SourceConfig, SourceFormat, SourceKind, StaticReading};
