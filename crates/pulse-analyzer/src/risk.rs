//! Pure scoring functions: percent change, severity, and the 0-100 risk score.

use chrono::Utc;
use pulse_types::{Indicator, RiskScore, Severity, Snapshot, SCHEMA_VERSION};

/// Deviation beyond the critical threshold at which the risk score saturates.
const SATURATION_SPAN_PCT: f64 = 35.0;

/// `(observed - baseline) * 100 / baseline`; `None` for a zero baseline.
pub fn percent_change(observed: f64, baseline: f64) -> Option<f64> {
    if baseline == 0.0 {
        return None;
    }
    let delta = (observed - baseline) * 100.0 / baseline;
    delta.is_finite().then_some(delta)
}

/// Round to 6 decimal places so boundaries such as 15.0 compare exactly.
pub fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// First match wins: `|delta| >= critical`, then `|delta| >= critical / 2`.
pub fn classify(delta_pct: f64, critical_threshold_pct: f64) -> Severity {
    let magnitude = delta_pct.abs();
    if magnitude >= critical_threshold_pct {
        Severity::Critical
    } else if magnitude >= critical_threshold_pct / 2.0 {
        Severity::Elevated
    } else {
        Severity::Normal
    }
}

/// Map `|delta_pct|` onto 0-30 (normal), 31-70 (elevated) and 71-100 (critical).
pub fn risk_score(delta_pct: f64, critical_threshold_pct: f64) -> u8 {
    let magnitude = delta_pct.abs();
    let critical = critical_threshold_pct;
    let elevated = critical / 2.0;

    if magnitude < elevated {
        (magnitude * 30.0 / elevated).floor().min(30.0) as u8
    } else if magnitude < critical {
        31 + ((magnitude - elevated) / (critical - elevated) * 39.0).floor() as u8
    } else {
        71 + ((magnitude - critical) / SATURATION_SPAN_PCT * 29.0)
            .floor()
            .min(29.0) as u8
    }
}

/// Score `snapshot` against the mean of `baseline_points` preceding values.
///
/// Too few points or a zero mean yields `Normal` with the matching flag and
/// no `delta_pct`.
pub fn assess(
    indicator: &Indicator,
    snapshot: &Snapshot,
    baseline_points: usize,
    baseline_mean: Option<f64>,
) -> RiskScore {
    let insufficient = baseline_points == 0 || baseline_points < indicator.effective_min_baseline();
    let baseline_avg = if insufficient { None } else { baseline_mean };

    let delta_pct = baseline_avg
        .and_then(|avg| percent_change(snapshot.value, avg))
        .map(round6);
    let zero_baseline = baseline_avg == Some(0.0);

    let (severity, score) = match delta_pct {
        Some(delta) => (
            classify(delta, indicator.critical_threshold_pct),
            risk_score(delta, indicator.critical_threshold_pct),
        ),
        None => (Severity::Normal, 0),
    };

    RiskScore {
        schema_version: SCHEMA_VERSION,
        id: RiskScore::score_id(&snapshot.indicator_id, &snapshot.timestamp, &snapshot.content_hash),
        indicator_id: snapshot.indicator_id.clone(),
        timestamp: snapshot.timestamp,
        snapshot_hash: snapshot.content_hash.clone(),
        snapshot_revision: snapshot.revision,
        baseline_avg,
        baseline_points,
        observed_value: snapshot.value,
        delta_pct,
        severity,
        risk_score: score,
        insufficient_baseline: insufficient,
        zero_baseline,
        computed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(value: f64) -> Snapshot {
        Snapshot::new(
            "freight_cost_index",
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
            value,
            "test",
        )
    }

    #[test]
    fn test_classification_boundaries() {
        assert_eq!(classify(15.0, 15.0), Severity::Critical);
        assert_eq!(classify(-15.0, 15.0), Severity::Critical);
        assert_eq!(classify(14.999, 15.0), Severity::Elevated);
        assert_eq!(classify(7.5, 15.0), Severity::Elevated);
        assert_eq!(classify(7.499, 15.0), Severity::Normal);
        assert_eq!(classify(0.0, 15.0), Severity::Normal);
    }

    #[test]
    fn test_percent_change() {
        assert_eq!(percent_change(116.0, 100.0), Some(16.0));
        assert_eq!(percent_change(95.0, 100.0), Some(-5.0));
        assert_eq!(percent_change(1.0, 0.0), None);
        // Floating-point noise disappears after rounding.
        assert_eq!(round6(14.999_999_999_9), 15.0);
    }

    #[test]
    fn test_risk_score_bands() {
        assert_eq!(risk_score(0.0, 15.0), 0);
        assert_eq!(risk_score(5.0, 15.0), 20);
        assert_eq!(risk_score(7.5, 15.0), 31);
        assert_eq!(risk_score(14.999, 15.0), 69);
        assert_eq!(risk_score(15.0, 15.0), 71);
        assert_eq!(risk_score(-16.0, 15.0), 71);
        assert_eq!(risk_score(50.0, 15.0), 100);
        assert_eq!(risk_score(500.0, 15.0), 100);
    }

    #[test]
    fn test_assess_critical() {
        let indicator = Indicator::new("freight_cost_index", "Freight", "index");
        let score = assess(&indicator, &snapshot(116.0), 30, Some(100.0));
        assert_eq!(score.delta_pct, Some(16.0));
        assert_eq!(score.severity, Severity::Critical);
        assert_eq!(score.baseline_avg, Some(100.0));
        assert!(!score.insufficient_baseline);
        assert_eq!(score.risk_score, 71);
    }

    #[test]
    fn test_assess_insufficient_and_zero_baseline() {
        let indicator = Indicator::new("freight_cost_index", "Freight", "index");

        let score = assess(&indicator, &snapshot(500.0), 3, Some(100.0));
        assert!(score.insufficient_baseline);
        assert_eq!(score.severity, Severity::Normal);
        assert_eq!(score.delta_pct, None);
        assert_eq!(score.baseline_avg, None);

        let score = assess(&indicator, &snapshot(500.0), 0, None);
        assert!(score.insufficient_baseline);

        let score = assess(&indicator, &snapshot(5.0), 10, Some(0.0));
        assert!(score.zero_baseline);
        assert!(!score.insufficient_baseline);
        assert_eq!(score.severity, Severity::Normal);
        assert_eq!(score.delta_pct, None);
        assert_eq!(score.risk_score, 0);
    }
}
