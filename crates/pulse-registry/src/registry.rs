use pulse_core::{PulseError, Result};
use pulse_types::Indicator;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Catalog of monitored indicators.
///
/// Entries are immutable once registered apart from window and threshold
/// tuning; readers always get an owned copy.
pub struct IndicatorRegistry {
    indicators: RwLock<HashMap<String, Indicator>>,
}

pub type SharedRegistry = Arc<IndicatorRegistry>;

impl Default for IndicatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicatorRegistry {
    pub fn new() -> Self {
        Self {
            indicators: RwLock::new(HashMap::new()),
        }
    }

    /// Build a registry from a configured catalog.
    ///
    /// # Errors
    /// * `InvalidInput` - an entry fails validation or an id repeats
    pub async fn from_indicators(indicators: impl IntoIterator<Item = Indicator>) -> Result<Self> {
        let registry = Self::new();
        for indicator in indicators {
            registry.register(indicator).await?;
        }
        Ok(registry)
    }

    /// Register a new indicator.
    ///
    /// # Errors
    /// * `InvalidInput` - the id is already registered or a parameter is out of range
    pub async fn register(&self, indicator: Indicator) -> Result<Indicator> {
        validate(&indicator)?;

        let mut indicators = self.indicators.write().await;
        if indicators.contains_key(&indicator.id) {
            return Err(PulseError::InvalidInput(format!(
                "indicator already registered: {}",
                indicator.id
            )));
        }

        info!(
            indicator_id = %indicator.id,
            window_size = indicator.window_size,
            critical_threshold_pct = indicator.critical_threshold_pct,
            period = ?indicator.period,
            "Indicator registered"
        );
        indicators.insert(indicator.id.clone(), indicator.clone());
        Ok(indicator)
    }

    pub async fn get(&self, indicator_id: &str) -> Option<Indicator> {
        let indicators = self.indicators.read().await;
        let found = indicators.get(indicator_id).cloned();
        if found.is_none() {
            debug!(indicator_id = %indicator_id, "Indicator not registered");
        }
        found
    }

    /// All indicators ordered by id.
    pub async fn list(&self) -> Vec<Indicator> {
        let indicators = self.indicators.read().await;
        let mut list: Vec<Indicator> = indicators.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub async fn ids(&self) -> Vec<String> {
        self.list().await.into_iter().map(|i| i.id).collect()
    }

    pub async fn len(&self) -> usize {
        self.indicators.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.indicators.read().await.is_empty()
    }

    /// Adjust window length and/or critical threshold.
    ///
    /// Scores already written keep the parameters they were computed with;
    /// only later analyses see the new values.
    ///
    /// # Errors
    /// * `NotFound` - the indicator is not registered
    /// * `InvalidInput` - the new values are out of range
    pub async fn tune(
        &self,
        indicator_id: &str,
        window_size: Option<usize>,
        critical_threshold_pct: Option<f64>,
    ) -> Result<Indicator> {
        let mut indicators = self.indicators.write().await;
        let current = indicators
            .get(indicator_id)
            .ok_or_else(|| PulseError::NotFound(format!("indicator {}", indicator_id)))?;

        let mut tuned = current.clone();
        if let Some(window_size) = window_size {
            tuned.window_size = window_size;
        }
        if let Some(pct) = critical_threshold_pct {
            tuned.critical_threshold_pct = pct;
        }
        validate(&tuned)?;

        info!(
            indicator_id = %indicator_id,
            window_size = tuned.window_size,
            critical_threshold_pct = tuned.critical_threshold_pct,
            "Indicator tuned"
        );
        indicators.insert(indicator_id.to_string(), tuned.clone());
        Ok(tuned)
    }

    /// # Errors
    /// * `NotFound` - the indicator is not registered
    pub async fn unregister(&self, indicator_id: &str) -> Result<Indicator> {
        let mut indicators = self.indicators.write().await;
        let removed = indicators
            .remove(indicator_id)
            .ok_or_else(|| PulseError::NotFound(format!("indicator {}", indicator_id)))?;
        info!(indicator_id = %indicator_id, "Indicator unregistered");
        Ok(removed)
    }
}

fn validate(indicator: &Indicator) -> Result<()> {
    if indicator.id.trim().is_empty() {
        return Err(PulseError::InvalidInput("indicator id must not be empty".into()));
    }
    if indicator.window_size == 0 {
        return Err(PulseError::InvalidInput(format!(
            "indicator {}: window_size must be greater than 0",
            indicator.id
        )));
    }
    if !indicator.critical_threshold_pct.is_finite() || indicator.critical_threshold_pct <= 0.0 {
        return Err(PulseError::InvalidInput(format!(
            "indicator {}: critical_threshold_pct must be positive",
            indicator.id
        )));
    }
    if !indicator.unit_scale.is_finite() || indicator.unit_scale == 0.0 {
        return Err(PulseError::InvalidInput(format!(
            "indicator {}: unit_scale must be finite and non-zero",
            indicator.id
        )));
    }
    Ok(())
}
