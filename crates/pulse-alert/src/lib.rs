pub mod consumer;
pub mod delivery;
pub mod evaluator;
pub mod journal;
pub mod rules;
pub mod sql;
pub mod store;

pub use consumer::spawn_alert_evaluator;
pub use delivery::{AlertDelivery, DeliveryResult, DeliveryRouter, LogDelivery, WebhookDelivery};
pub use evaluator::{rule_matches, AlertEvaluator};
pub use journal::JournalAlertStore;
pub use rules::{MemoryRuleSource, RuleSource, SharedRuleSource};
pub use sql::SqlAlertStore;
pub use store::{AlertEventStore, MemoryAlertStore, SharedAlertStore};
