use metrics::{counter, describe_counter};

/// Register descriptions for every pipeline counter.
pub fn describe_metrics() {
    describe_counter!(
        "pulse_snapshots_written_total",
        "Snapshots committed by ingestion, by outcome (inserted/corrected/duplicate)"
    );
    describe_counter!(
        "pulse_snapshots_rejected_total",
        "Readings rejected as malformed during normalization"
    );
    describe_counter!(
        "pulse_fetch_failures_total",
        "Indicators whose fetch failed for a run, by kind"
    );
    describe_counter!(
        "pulse_scores_upserted_total",
        "Risk score upserts, by outcome"
    );
    describe_counter!("pulse_alerts_raised_total", "Alert events created");
    describe_counter!(
        "pulse_alert_deliveries_total",
        "Alert delivery attempts, by channel and status"
    );
}

pub fn record_snapshot_written(indicator_id: &str, outcome: &'static str) {
    counter!(
        "pulse_snapshots_written_total",
        1,
        "indicator" => indicator_id.to_string(),
        "outcome" => outcome
    );
}

pub fn record_snapshot_rejected(indicator_id: &str) {
    counter!(
        "pulse_snapshots_rejected_total",
        1,
        "indicator" => indicator_id.to_string()
    );
}

pub fn record_fetch_failure(indicator_id: &str, kind: &'static str) {
    counter!(
        "pulse_fetch_failures_total",
        1,
        "indicator" => indicator_id.to_string(),
        "kind" => kind
    );
}

pub fn record_score_upserted(indicator_id: &str, outcome: &'static str) {
    counter!(
        "pulse_scores_upserted_total",
        1,
        "indicator" => indicator_id.to_string(),
        "outcome" => outcome
    );
}

pub fn record_alert_raised(indicator_id: &str) {
    counter!(
        "pulse_alerts_raised_total",
        1,
        "indicator" => indicator_id.to_string()
    );
}

pub fn record_alert_delivery(channel: &'static str, status: &'static str) {
    counter!(
        "pulse_alert_deliveries_total",
        1,
        "channel" => channel,
        "status" => status
    );
}
