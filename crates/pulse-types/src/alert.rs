use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::score::{RiskScore, Severity};

/// Delivery channel requested by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Webhook,
    Log,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Webhook => "webhook",
            Channel::Log => "log",
        };
        f.write_str(s)
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "email" => Ok(Channel::Email),
            "sms" => Ok(Channel::Sms),
            "webhook" => Ok(Channel::Webhook),
            "log" => Ok(Channel::Log),
            other => Err(format!("unknown channel: {}", other)),
        }
    }
}

/// User-defined alert threshold for one indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub user_id: String,
    pub indicator_id: String,
    pub threshold_pct: f64,
    pub min_severity: Severity,
    pub channel: Channel,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl AlertRule {
    pub fn new(
        user_id: impl Into<String>,
        indicator_id: impl Into<String>,
        threshold_pct: f64,
        min_severity: Severity,
        channel: Channel,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            indicator_id: indicator_id.into(),
            threshold_pct,
            min_severity,
            channel,
            enabled: true,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(DeliveryStatus::Pending),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status: {}", other)),
        }
    }
}

/// A rule-matching risk score awaiting (or past) delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: String,
    pub rule_id: String,
    pub risk_score_id: String,
    pub user_id: String,
    pub indicator_id: String,
    pub channel: Channel,
    pub severity: Severity,
    pub delta_pct: f64,
    pub raised_at: DateTime<Utc>,
    pub delivery_status: DeliveryStatus,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivery_error: Option<String>,
}

impl AlertEvent {
    /// At most one event exists per `(rule_id, risk_score_id)`.
    pub fn event_id(rule_id: &str, risk_score_id: &str) -> String {
        format!("{}:{}", rule_id, risk_score_id)
    }

    pub fn new(rule: &AlertRule, score: &RiskScore, delta_pct: f64) -> Self {
        Self {
            id: Self::event_id(&rule.id, &score.id),
            rule_id: rule.id.clone(),
            risk_score_id: score.id.clone(),
            user_id: rule.user_id.clone(),
            indicator_id: score.indicator_id.clone(),
            channel: rule.channel,
            severity: score.severity,
            delta_pct,
            raised_at: Utc::now(),
            delivery_status: DeliveryStatus::Pending,
            delivered_at: None,
            delivery_error: None,
        }
    }

    pub fn mark_delivered(&mut self) {
        self.delivery_status = DeliveryStatus::Delivered;
        self.delivered_at = Some(Utc::now());
        self.delivery_error = None;
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.delivery_status = DeliveryStatus::Failed;
        self.delivery_error = Some(reason.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_enabled_defaults_true() {
        let rule: AlertRule = serde_json::from_value(serde_json::json!({
            "id": "r1",
            "user_id": "u1",
            "indicator_id": "cpi",
            "threshold_pct": 10.0,
            "min_severity": "elevated",
            "channel": "email"
        }))
        .unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.min_severity, Severity::Elevated);
        assert_eq!(rule.channel, Channel::Email);
    }

    #[test]
    fn test_event_id_is_deterministic() {
        assert_eq!(AlertEvent::event_id("r1", "cpi@x#1"), "r1:cpi@x#1");
    }

    #[test]
    fn test_channel_and_status_text_match_serde() {
        for channel in [Channel::Email, Channel::Sms, Channel::Webhook, Channel::Log] {
            let text = channel.to_string();
            assert_eq!(serde_json::to_value(channel).unwrap(), text.as_str());
            assert_eq!(text.parse::<Channel>().unwrap(), channel);
        }
        assert_eq!("Delivered".parse::<DeliveryStatus>().unwrap(), DeliveryStatus::Delivered);
        assert!("sent".parse::<DeliveryStatus>().is_err());
    }
}
