use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_WINDOW_SIZE: usize = 30;
pub const DEFAULT_CRITICAL_THRESHOLD_PCT: f64 = 15.0;
pub const DEFAULT_MIN_BASELINE: usize = 7;

/// Sampling period of an indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    #[default]
    Day,
    Week,
    Month,
}

impl Period {
    /// Truncate an instant to the start of the period containing it (UTC).
    pub fn align(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let date = ts.date_naive();
        let start = match self {
            Period::Day => date,
            Period::Week => {
                date - Duration::days(date.weekday().num_days_from_monday() as i64)
            }
            Period::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date),
        };
        Utc.from_utc_datetime(&start.and_time(NaiveTime::MIN))
    }

    /// Move `periods` periods back from `ts`.
    pub fn step_back(&self, ts: DateTime<Utc>, periods: u32) -> DateTime<Utc> {
        match self {
            Period::Day => ts - Duration::days(periods as i64),
            Period::Week => ts - Duration::weeks(periods as i64),
            Period::Month => ts
                .checked_sub_months(Months::new(periods))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }
}

/// A monitored economic or logistics metric and its analysis parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    pub id: String,
    pub name: String,
    pub unit: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Trailing periods averaged into the baseline.
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    #[serde(default)]
    pub period: Period,

    /// |delta_pct| at or above this is Critical; half of it is Elevated.
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold_pct: f64,

    /// Baseline points required before a deviation is scored.
    #[serde(default = "default_min_baseline")]
    pub min_baseline: usize,

    /// Multiplier applied to raw readings during normalization.
    #[serde(default = "default_unit_scale")]
    pub unit_scale: f64,

    #[serde(default)]
    pub source: String,
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

fn default_critical_threshold() -> f64 {
    DEFAULT_CRITICAL_THRESHOLD_PCT
}

fn default_min_baseline() -> usize {
    DEFAULT_MIN_BASELINE
}

fn default_unit_scale() -> f64 {
    1.0
}

impl Indicator {
    pub fn new(id: impl Into<String>, name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            unit: unit.into(),
            description: None,
            window_size: DEFAULT_WINDOW_SIZE,
            period: Period::Day,
            critical_threshold_pct: DEFAULT_CRITICAL_THRESHOLD_PCT,
            min_baseline: DEFAULT_MIN_BASELINE,
            unit_scale: 1.0,
            source: String::new(),
        }
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_period(mut self, period: Period) -> Self {
        self.period = period;
        self
    }

    pub fn with_critical_threshold(mut self, pct: f64) -> Self {
        self.critical_threshold_pct = pct;
        self
    }

    pub fn with_min_baseline(mut self, min_baseline: usize) -> Self {
        self.min_baseline = min_baseline;
        self
    }

    pub fn with_unit_scale(mut self, unit_scale: f64) -> Self {
        self.unit_scale = unit_scale;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn elevated_threshold_pct(&self) -> f64 {
        self.critical_threshold_pct / 2.0
    }

    /// Minimum baseline, never larger than the window itself.
    pub fn effective_min_baseline(&self) -> usize {
        self.min_baseline.min(self.window_size)
    }
}
