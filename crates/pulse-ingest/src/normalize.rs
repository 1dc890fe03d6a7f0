use pulse_core::{PulseError, RawReading, Result};
use pulse_types::{Indicator, Snapshot};
use serde_json::Value;

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

/// Turn a raw reading into a snapshot of `indicator`.
///
/// Applies `unit_scale` and aligns the timestamp to the indicator's period.
/// Non-numeric values (`null`, booleans, `"."`, non-finite numbers) are
/// rejected as `MalformedData`, never coerced.
pub fn normalize(indicator: &Indicator, reading: &RawReading) -> Result<Snapshot> {
    let raw = numeric(&reading.value).ok_or_else(|| {
        PulseError::malformed(format!(
            "{} at {}: value {} is not numeric",
            indicator.id, reading.timestamp, reading.value
        ))
    })?;

    let value = raw * indicator.unit_scale;
    if !value.is_finite() {
        return Err(PulseError::malformed(format!(
            "{} at {}: scaled value overflows",
            indicator.id, reading.timestamp
        )));
    }

    let source = if indicator.source.is_empty() {
        "unknown"
    } else {
        indicator.source.as_str()
    };

    Ok(Snapshot::new(
        indicator.id.clone(),
        indicator.period.align(reading.timestamp),
        value,
        source,
    ))
}
