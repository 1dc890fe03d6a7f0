use async_trait::async_trait;
use pulse_core::{PulseError, Result};
use pulse_types::{AlertEvent, Channel};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Outcome reported by a delivery collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub success: bool,
    pub message: String,
}

impl DeliveryResult {
    pub fn success() -> Self {
        Self {
            success: true,
            message: "delivered".to_string(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Hands an alert to the outside world. Never retried by the evaluator.
#[async_trait]
pub trait AlertDelivery: Send + Sync {
    async fn deliver(&self, event: &AlertEvent) -> DeliveryResult;

    fn name(&self) -> &str;
}

/// Emits the alert as a structured log line.
pub struct LogDelivery;

#[async_trait]
impl AlertDelivery for LogDelivery {
    async fn deliver(&self, event: &AlertEvent) -> DeliveryResult {
        info!(
            alert_id = %event.id,
            user_id = %event.user_id,
            indicator_id = %event.indicator_id,
            severity = %event.severity,
            delta_pct = event.delta_pct,
            "ALERT raised"
        );
        DeliveryResult::success()
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// POSTs the alert event as JSON. A request that outlives `timeout` fails.
pub struct WebhookDelivery {
    url: String,
    headers: HashMap<String, String>,
    client: Client,
    timeout: Duration,
}

impl WebhookDelivery {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PulseError::Config(format!("webhook client: {}", e)))?;
        Ok(Self {
            url: url.into(),
            headers: HashMap::new(),
            client,
            timeout,
        })
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl AlertDelivery for WebhookDelivery {
    async fn deliver(&self, event: &AlertEvent) -> DeliveryResult {
        let mut request = self.client.post(&self.url);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        match request.json(event).send().await {
            Ok(response) if response.status().is_success() => DeliveryResult::success(),
            Ok(response) => {
                DeliveryResult::failure(format!("webhook returned {}", response.status()))
            }
            Err(e) if e.is_timeout() => DeliveryResult::failure(format!(
                "webhook timed out after {}ms",
                self.timeout.as_millis()
            )),
            Err(e) => DeliveryResult::failure(format!("webhook request failed: {}", e)),
        }
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Routes alerts to the delivery registered for their channel.
#[derive(Default)]
pub struct DeliveryRouter {
    deliveries: RwLock<HashMap<Channel, Arc<dyn AlertDelivery>>>,
}

impl DeliveryRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, channel: Channel, delivery: Arc<dyn AlertDelivery>) {
        info!(channel = ?channel, delivery = %delivery.name(), "Registered alert delivery");
        self.deliveries.write().await.insert(channel, delivery);
    }

    pub async fn route(&self, channel: Channel) -> Option<Arc<dyn AlertDelivery>> {
        self.deliveries.read().await.get(&channel).cloned()
    }

    /// Deliver through the channel's registration; an unrouted channel fails.
    pub async fn deliver(&self, event: &AlertEvent) -> DeliveryResult {
        match self.route(event.channel).await {
            Some(delivery) => delivery.deliver(event).await,
            None => {
                warn!(alert_id = %event.id, channel = ?event.channel, "No delivery registered");
                DeliveryResult::failure(format!("no delivery registered for {:?}", event.channel))
            }
        }
    }
}
