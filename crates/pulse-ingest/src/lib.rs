pub mod fetcher;
pub mod normalize;
pub mod parser;
pub mod scheduler;
pub mod worker;

pub use fetcher::{fetcher_for_source, HttpJsonFetcher, JsonFileFetcher, StaticFetcher};
pub use normalize::normalize;
pub use parser::{parse_document, parse_timestamp, ParseError, ParsedReading};
pub use scheduler::IngestionScheduler;
pub use worker::{FailureKind, IndicatorOutcome, IngestCounts, IngestionWorker, RunReport};
