pub mod registry;

pub use registry::{IndicatorRegistry, SharedRegistry};
