//! Analysis engine for signalforge.
//!
//! - `anomaly`: z-score detection over arbitrary numeric extracts
//! - `delta`: enrich a fresh signal set with changes against the prior report
//! - `signals`: the metric catalogue applied to each signal family

pub mod anomaly;
pub mod delta;
pub mod signals;

pub use anomaly::{
    detect_anomalies, detect_multi_metric_anomalies, enrich_with_z_scores, summarize, z_score,
    AnomalyResult, ItemAnomalies, Metric, Summary, DEFAULT_THRESHOLD,
};
pub use delta::{absolute_delta, apply_deltas, percent_delta};
pub use signals::detect_signal_anomalies;
