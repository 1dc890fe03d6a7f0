//! Decoders for the upstream JSON layouts (FRED, port congestion, freight).

use chrono::{DateTime, NaiveDate, Utc};
use pulse_config::SourceFormat;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

const DEFAULT_FRED_METRIC: &str = "inflation_rate_cpi";
const FREIGHT_METRIC: &str = "freight_cost_index";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("document is not a JSON object")]
    NotAnObject,

    #[error("document matches no {0:?} layout")]
    UnknownLayout(SourceFormat),
}

/// One reading found in a source document. The value is left raw.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReading {
    pub metric: String,
    pub timestamp: DateTime<Utc>,
    pub value: Value,
}

/// Accepts `YYYY-MM-DD` (midnight UTC) or RFC 3339.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Decode `doc` according to `format`.
///
/// Entries with a missing or unparseable timestamp are skipped with a warning;
/// values are not inspected here.
pub fn parse_document(format: SourceFormat, doc: &Value) -> Result<Vec<ParsedReading>, ParseError> {
    let obj = doc.as_object().ok_or(ParseError::NotAnObject)?;
    let entries = match format {
        SourceFormat::Fred => fred_entries(obj),
        SourceFormat::PortCongestion => port_entries(obj).or_else(|| freight_entries(obj)),
        SourceFormat::Freight => freight_entries(obj),
    }
    .ok_or(ParseError::UnknownLayout(format))?;

    Ok(entries
        .into_iter()
        .filter_map(|(metric, raw_ts, value)| match raw_ts.as_deref().and_then(parse_timestamp) {
            Some(timestamp) => Some(ParsedReading {
                metric,
                timestamp,
                value,
            }),
            None => {
                warn!(metric = %metric, timestamp = ?raw_ts, "Skipping entry without a usable timestamp");
                None
            }
        })
        .collect())
}

type Entry = (String, Option<String>, Value);

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k))
}

fn timestamp_of(obj: &Map<String, Value>) -> Option<String> {
    field(obj, &["date", "timestamp"])
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn fred_entries(obj: &Map<String, Value>) -> Option<Vec<Entry>> {
    if let Some(Value::Array(observations)) = obj.get("data") {
        if observations.is_empty() {
            return None;
        }
        let metric = obj
            .get("series_id")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_FRED_METRIC)
            .to_string();
        return Some(
            observations
                .iter()
                .filter_map(Value::as_object)
                .map(|o| {
                    (
                        metric.clone(),
                        timestamp_of(o),
                        o.get("value").cloned().unwrap_or(Value::Null),
                    )
                })
                .collect(),
        );
    }

    match (obj.get("metric").and_then(Value::as_str), obj.get("value")) {
        (Some(metric), Some(value)) => Some(vec![(metric.to_string(), timestamp_of(obj), value.clone())]),
        _ => None,
    }
}

fn port_entry(obj: &Map<String, Value>) -> Entry {
    let port = obj.get("port").and_then(Value::as_str).unwrap_or("unknown");
    (
        format!("port_congestion_{}", port),
        timestamp_of(obj),
        field(obj, &["congestion_count", "value"])
            .cloned()
            .unwrap_or(Value::Null),
    )
}

fn port_entries(obj: &Map<String, Value>) -> Option<Vec<Entry>> {
    if let Some(Value::Array(ports)) = obj.get("ports") {
        return Some(ports.iter().filter_map(Value::as_object).map(port_entry).collect());
    }
    if obj.contains_key("port") || obj.contains_key("congestion_count") {
        return Some(vec![port_entry(obj)]);
    }
    None
}

fn freight_entries(obj: &Map<String, Value>) -> Option<Vec<Entry>> {
    let value = field(obj, &["freight_cost_index", "freight_index"])?;
    Some(vec![(FREIGHT_METRIC.to_string(), timestamp_of(obj), value.clone())])
}
