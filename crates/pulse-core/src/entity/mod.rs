pub mod alert_events;
pub mod risk_scores;
