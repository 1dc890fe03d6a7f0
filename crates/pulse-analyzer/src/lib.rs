pub mod analyzer;
pub mod consumer;
pub mod moving_average;
pub mod risk;

pub use analyzer::{AnalysisOutcome, AnalyzerSettings, RiskAnalyzer, SharedAnalyzer};
pub use consumer::spawn_analyzer;
pub use moving_average::{MovingAverageState, WindowCache};
pub use risk::{assess, classify, percent_change, risk_score, round6};
