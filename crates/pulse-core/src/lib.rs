pub mod bus;
pub mod entity;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod traits;

pub use bus::{EventBus, SharedEventBus};
pub use error::{FetchError, PulseError, Result};
pub use retry::{retry, retry_counted, RetryPolicy};
pub use traits::fetcher::{Fetcher, RawReading};
