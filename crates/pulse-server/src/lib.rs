pub mod api;
pub mod metrics;
pub mod pipeline;

use pulse_alert::SharedAlertStore;
use pulse_registry::SharedRegistry;
use pulse_timeseries::QueryService;

pub use pipeline::Pipeline;

/// Shared by the HTTP handlers (and by the API tests).
pub struct AppState {
    pub registry: SharedRegistry,
    pub query: QueryService,
    pub alerts: SharedAlertStore,
}
