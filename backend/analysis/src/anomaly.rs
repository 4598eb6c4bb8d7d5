//! Z-score anomaly detection.
//!
//! Mean is the plain average; the standard deviation is the sample estimate
//! (divisor `n - 1`, zero below two samples). A zero deviation means the cohort
//! has no spread, so nothing is reported as anomalous.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;
use signalforge_core::{ReportAnomaly, SignalFamily};

/// Default number of standard deviations for an item to count as anomalous.
pub const DEFAULT_THRESHOLD: f64 = 2.0;

/// One item flagged on one metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyResult<T> {
    pub item: T,
    pub metric: String,
    pub value: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub z_score: f64,
}

impl<T> AnomalyResult<T> {
    /// Flatten into the persisted report shape.
    pub fn to_report(&self, family: SignalFamily, entity: impl Into<String>) -> ReportAnomaly {
        ReportAnomaly {
            family,
            entity: entity.into(),
            metric: self.metric.clone(),
            value: self.value,
            mean: self.mean,
            std_dev: self.std_dev,
            z_score: self.z_score,
        }
    }
}

/// A named numeric accessor.
pub struct Metric<T> {
    pub name: &'static str,
    pub extract: fn(&T) -> f64,
}

impl<T> Metric<T> {
    pub fn new(name: &'static str, extract: fn(&T) -> f64) -> Self {
        Self { name, extract }
    }
}

impl<T> Clone for Metric<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Metric<T> {}

/// Mean and sample standard deviation of a cohort.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
}

pub fn summarize(values: &[f64]) -> Summary {
    let count = values.len();
    if count == 0 {
        return Summary { count, mean: 0.0, std_dev: 0.0 };
    }
    let mean = values.iter().sum::<f64>() / count as f64;
    let std_dev = if count < 2 {
        0.0
    } else {
        let squared: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
        (squared / (count - 1) as f64).sqrt()
    };
    Summary { count, mean, std_dev }
}

/// `(value - mean) / std_dev`, or `0` when there is no spread.
pub fn z_score(value: f64, mean: f64, std_dev: f64) -> f64 {
    if std_dev == 0.0 {
        return 0.0;
    }
    (value - mean) / std_dev
}

/// Items whose `|z| >= threshold`, most anomalous first.
///
/// Ties keep their input order.
pub fn detect_anomalies<'a, T, F>(
    items: &'a [T],
    extract: F,
    metric: &str,
    threshold: f64,
) -> Vec<AnomalyResult<&'a T>>
where
    F: Fn(&T) -> f64,
{
    scan(items, extract, metric, threshold)
        .into_iter()
        .map(|(_, result)| result)
        .collect()
}

/// All anomalies of one item across several metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemAnomalies<'a, T> {
    /// Position of the item in the input slice.
    pub index: usize,
    pub item: &'a T,
    /// In metric order, first-detected metric first.
    pub results: Vec<AnomalyResult<&'a T>>,
}

/// Run [`detect_anomalies`] once per metric and group the hits per item.
///
/// Items are returned in the order they were first flagged.
pub fn detect_multi_metric_anomalies<'a, T>(
    items: &'a [T],
    metrics: &[Metric<T>],
    threshold: f64,
) -> Vec<ItemAnomalies<'a, T>> {
    let mut grouped: Vec<ItemAnomalies<'a, T>> = Vec::new();
    let mut slot_of: HashMap<usize, usize> = HashMap::new();

    for metric in metrics {
        for (index, result) in scan(items, metric.extract, metric.name, threshold) {
            let slot = *slot_of.entry(index).or_insert_with(|| {
                grouped.push(ItemAnomalies { index, item: &items[index], results: Vec::new() });
                grouped.len() - 1
            });
            grouped[slot].results.push(result);
        }
    }

    grouped
}

/// Annotate every item with its z-score instead of filtering.
///
/// Statistics are computed once over the whole collection; `setter` receives
/// `0` for every item when there is no spread.
pub fn enrich_with_z_scores<T, F, S>(items: &mut [T], extract: F, mut setter: S)
where
    F: Fn(&T) -> f64,
    S: FnMut(&mut T, f64),
{
    let values: Vec<f64> = items.iter().map(&extract).collect();
    let stats = summarize(&values);
    for (item, value) in items.iter_mut().zip(values) {
        setter(item, z_score(value, stats.mean, stats.std_dev));
    }
}

fn scan<'a, T, F>(
    items: &'a [T],
    extract: F,
    metric: &str,
    threshold: f64,
) -> Vec<(usize, AnomalyResult<&'a T>)>
where
    F: Fn(&T) -> f64,
{
    let values: Vec<f64> = items.iter().map(&extract).collect();
    let stats = summarize(&values);
    if stats.std_dev == 0.0 {
        return Vec::new();
    }

    let mut hits: Vec<(usize, AnomalyResult<&'a T>)> = items
        .iter()
        .zip(values)
        .enumerate()
        .filter_map(|(index, (item, value))| {
            let z = z_score(value, stats.mean, stats.std_dev);
            (z.abs() >= threshold).then(|| {
                (
                    index,
                    AnomalyResult {
                        item,
                        metric: metric.to_string(),
                        value,
                        mean: stats.mean,
                        std_dev: stats.std_dev,
                        z_score: z,
                    },
                )
            })
        })
        .collect();

    // Stable: equal |z| keep input order.
    hits.sort_by(|(_, a), (_, b)| {
        b.z_score
            .abs()
            .partial_cmp(&a.z_score.abs())
            .unwrap_or(Ordering::Equal)
    });
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(v: &f64) -> f64 {
        *v
    }

    #[derive(Debug, PartialEq)]
    struct Row {
        name: &'static str,
        a: f64,
        b: f64,
        z: f64,
    }

    fn row(name: &'static str, a: f64, b: f64) -> Row {
        Row { name, a, b, z: f64::NAN }
    }

    #[test]
    fn z_score_is_zero_without_spread() {
        assert_eq!(z_score(42.0, 10.0, 0.0), 0.0);
        assert_eq!(z_score(13.0, 10.0, 1.5), 2.0);
    }

    #[test]
    fn summary_uses_sample_deviation() {
        let s = summarize(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(s.mean, 5.0);
        // population sd would be 2.0
        assert!((s.std_dev - 2.138_089_935).abs() < 1e-6);
        assert_eq!(summarize(&[3.0]).std_dev, 0.0);
        assert_eq!(summarize(&[]).count, 0);
    }

    #[test]
    fn constant_metric_yields_nothing() {
        let values = [7.0; 6];
        for threshold in [0.0, 0.5, 2.0] {
            assert!(detect_anomalies(&values, identity, "flat", threshold).is_empty());
        }
    }

    #[test]
    fn single_item_yields_nothing() {
        assert!(detect_anomalies(&[100.0], identity, "solo", 0.0).is_empty());
    }

    #[test]
    fn boundary_sensitivity_on_hand_computed_cohort() {
        let values = [10.0, 12.0, 11.0, 13.0, 50.0];

        assert!(detect_anomalies(&values, identity, "v", DEFAULT_THRESHOLD).is_empty());

        let hits = detect_anomalies(&values, identity, "v", 1.5);
        assert_eq!(hits.len(), 1);
        let hit = &hits[0];
        assert_eq!(*hit.item, 50.0);
        assert!((hit.mean - 19.2).abs() < 1e-9);
        assert!((hit.std_dev - 17.254).abs() < 1e-3);
        assert!((hit.z_score - 1.785).abs() < 1e-3);
    }

    #[test]
    fn filter_is_exact_and_sorted_by_magnitude() {
        let values = [0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 9.0, -6.0, 2.0];
        let threshold = 1.0;
        let hits = detect_anomalies(&values, identity, "v", threshold);
        let stats = summarize(&values);

        for v in &values {
            let flagged = hits.iter().any(|h| std::ptr::eq(h.item, v));
            let z = z_score(*v, stats.mean, stats.std_dev);
            assert_eq!(flagged, z.abs() >= threshold, "value {v} z {z}");
        }
        for pair in hits.windows(2) {
            assert!(pair[0].z_score.abs() >= pair[1].z_score.abs());
        }
        assert_eq!(*hits[0].item, 9.0);
        assert!(hits.iter().any(|h| h.z_score < 0.0));
    }

    #[test]
    fn ties_keep_input_order() {
        let rows = vec![
            row("low", 0.0, 0.0),
            row("mid-a", 5.0, 0.0),
            row("mid-b", 5.0, 0.0),
            row("high", 10.0, 0.0),
        ];
        let hits = detect_anomalies(&rows, |r| r.a, "a", 0.5);
        let names: Vec<_> = hits.iter().map(|h| h.item.name).collect();
        assert_eq!(names, vec!["low", "high"]);

        let tied = vec![
            row("first", 10.0, 0.0),
            row("x", 0.0, 0.0),
            row("y", 0.0, 0.0),
            row("z", 0.0, 0.0),
            row("w", 0.0, 0.0),
            row("second", 10.0, 0.0),
        ];
        let hits = detect_anomalies(&tied, |r| r.a, "a", 1.0);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].item.name, "first");
        assert_eq!(hits[1].item.name, "second");
    }

    #[test]
    fn multi_metric_groups_per_item() {
        let rows = vec![
            row("spike", 100.0, 100.0),
            row("a", 1.0, 1.0),
            row("b", 2.0, 2.0),
            row("c", 1.0, 2.0),
            row("d", 2.0, 1.0),
            row("only-b", 1.0, 2.0),
        ];
        let metrics = [Metric::new("a", |r: &Row| r.a), Metric::new("b", |r: &Row| r.b)];
        let grouped = detect_multi_metric_anomalies(&rows, &metrics, 1.5);

        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].index, 0);
        assert_eq!(grouped[0].item.name, "spike");
        let names: Vec<_> = grouped[0].results.iter().map(|r| r.metric.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn multi_metric_orders_items_by_first_detection() {
        let rows = vec![
            row("b-outlier", 1.0, 50.0),
            row("a-outlier", 50.0, 1.0),
            row("n1", 1.0, 1.0),
            row("n2", 1.0, 1.0),
            row("n3", 1.0, 1.0),
        ];
        let metrics = [Metric::new("a", |r: &Row| r.a), Metric::new("b", |r: &Row| r.b)];
        let grouped = detect_multi_metric_anomalies(&rows, &metrics, 1.5);
        let names: Vec<_> = grouped.iter().map(|g| g.item.name).collect();
        assert_eq!(names, vec!["a-outlier", "b-outlier"]);
    }

    #[test]
    fn enrich_sets_every_item() {
        let mut rows = vec![row("x", 1.0, 0.0), row("y", 3.0, 0.0)];
        enrich_with_z_scores(&mut rows, |r| r.a, |r, z| r.z = z);
        assert!(rows[0].z < 0.0 && rows[1].z > 0.0);
        assert!((rows[0].z + rows[1].z).abs() < 1e-12);

        let mut flat = vec![row("x", 4.0, 0.0), row("y", 4.0, 0.0)];
        enrich_with_z_scores(&mut flat, |r| r.a, |r, z| r.z = z);
        assert!(flat.iter().all(|r| r.z == 0.0));
    }

    #[test]
    fn to_report_copies_statistics() {
        let values = [1.0, 1.0, 1.0, 10.0];
        let hits = detect_anomalies(&values, identity, "stars", 1.0);
        let report = hits[0].to_report(SignalFamily::Leading, "org/repo");
        assert_eq!(report.entity, "org/repo");
        assert_eq!(report.metric, "stars");
        assert_eq!(report.z_score, hits[0].z_score);
    }
}
