use async_trait::async_trait;
use pulse_core::{PulseError, Result};
use pulse_types::AlertRule;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Read-only access to alert rules, owned by the user-facing layer.
#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn rules_for_indicator(&self, indicator_id: &str) -> Result<Vec<AlertRule>>;
}

pub type SharedRuleSource = Arc<dyn RuleSource>;

/// In-process rule source, seeded from configuration.
#[derive(Default)]
pub struct MemoryRuleSource {
    rules: RwLock<HashMap<String, AlertRule>>,
}

impl MemoryRuleSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// * `InvalidInput` - a rule fails validation
    pub async fn from_rules(rules: impl IntoIterator<Item = AlertRule>) -> Result<Self> {
        let source = Self::new();
        for rule in rules {
            source.save(rule).await?;
        }
        Ok(source)
    }

    /// Insert or replace by rule id; returns the replaced rule.
    ///
    /// # Errors
    /// * `InvalidInput` - empty ids or a negative / non-finite threshold
    pub async fn save(&self, rule: AlertRule) -> Result<Option<AlertRule>> {
        if rule.id.is_empty() || rule.user_id.is_empty() || rule.indicator_id.is_empty() {
            return Err(PulseError::InvalidInput(
                "rule id, user_id and indicator_id must be set".to_string(),
            ));
        }
        if !rule.threshold_pct.is_finite() || rule.threshold_pct < 0.0 {
            return Err(PulseError::InvalidInput(format!(
                "rule {}: threshold_pct must be a non-negative number",
                rule.id
            )));
        }

        info!(
            rule_id = %rule.id,
            user_id = %rule.user_id,
            indicator_id = %rule.indicator_id,
            threshold_pct = rule.threshold_pct,
            min_severity = %rule.min_severity,
            "Alert rule saved"
        );
        Ok(self.rules.write().await.insert(rule.id.clone(), rule))
    }

    /// # Errors
    /// * `NotFound` - no rule with this id
    pub async fn delete(&self, rule_id: &str) -> Result<AlertRule> {
        let removed = self.rules.write().await.remove(rule_id);
        match removed {
            Some(rule) => {
                info!(rule_id = %rule_id, "Alert rule deleted");
                Ok(rule)
            }
            None => Err(PulseError::NotFound(format!("alert rule {}", rule_id))),
        }
    }

    pub async fn get(&self, rule_id: &str) -> Option<AlertRule> {
        self.rules.read().await.get(rule_id).cloned()
    }

    pub async fn rules_for_user(&self, user_id: &str) -> Vec<AlertRule> {
        let mut rules: Vec<AlertRule> = self
            .rules
            .read()
            .await
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        rules
    }

    pub async fn len(&self) -> usize {
        self.rules.read().await.len()
    }
}

#[async_trait]
impl RuleSource for MemoryRuleSource {
    /// Disabled rules are included; the evaluator skips them.
    async fn rules_for_indicator(&self, indicator_id: &str) -> Result<Vec<AlertRule>> {
        let mut rules: Vec<AlertRule> = self
            .rules
            .read()
            .await
            .values()
            .filter(|r| r.indicator_id == indicator_id)
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_types::{Channel, Severity};

    fn rule(id: &str, user: &str, indicator: &str) -> AlertRule {
        AlertRule::new(user, indicator, 10.0, Severity::Elevated, Channel::Log).with_id(id)
    }

    #[tokio::test]
    async fn test_save_replaces_by_id() {
        let source = MemoryRuleSource::new();
        assert!(source.save(rule("r1", "alice", "cpi")).await.unwrap().is_none());

        let mut updated = rule("r1", "alice", "cpi");
        updated.threshold_pct = 20.0;
        let previous = source.save(updated).await.unwrap().unwrap();
        assert_eq!(previous.threshold_pct, 10.0);
        assert_eq!(source.len().await, 1);
        assert_eq!(source.get("r1").await.unwrap().threshold_pct, 20.0);
    }

    #[tokio::test]
    async fn test_queries_by_user_and_indicator() {
        let source = MemoryRuleSource::from_rules([
            rule("r1", "alice", "cpi"),
            rule("r2", "alice", "freight"),
            rule("r3", "bob", "cpi"),
        ])
        .await
        .unwrap();

        let alice: Vec<String> = source.rules_for_user("alice").await.into_iter().map(|r| r.id).collect();
        assert_eq!(alice, vec!["r1", "r2"]);

        let cpi: Vec<String> = source
            .rules_for_indicator("cpi")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(cpi, vec!["r1", "r3"]);

        source.delete("r1").await.unwrap();
        assert!(matches!(source.delete("r1").await, Err(PulseError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rejects_negative_threshold() {
        let source = MemoryRuleSource::new();
        let mut bad = rule("r1", "alice", "cpi");
        bad.threshold_pct = -1.0;
        assert!(matches!(source.save(bad).await, Err(PulseError::InvalidInput(_))));
    }
}
