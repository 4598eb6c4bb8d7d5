//! Metric catalogue for the signal families.

use signalforge_core::{
    ProgramSignal, ProtocolVolume, RepoSignal, ReportAnomaly, SignalFamily, SignalSet, TokenSignal,
};
use tracing::debug;

use crate::anomaly::{detect_multi_metric_anomalies, Metric};

fn repo_metrics() -> [Metric<RepoSignal>; 2] {
    [
        Metric::new("stars", |r: &RepoSignal| r.stars as f64),
        Metric::new("commits30d", |r: &RepoSignal| r.commits_30d as f64),
    ]
}

fn program_metrics() -> [Metric<ProgramSignal>; 2] {
    [
        Metric::new("txCount", |p: &ProgramSignal| p.tx_count as f64),
        Metric::new("uniqueWallets", |p: &ProgramSignal| p.unique_wallets as f64),
    ]
}

fn protocol_metrics() -> [Metric<ProtocolVolume>; 1] {
    [Metric::new("volume24h", |p: &ProtocolVolume| p.volume_24h)]
}

fn token_metrics() -> [Metric<TokenSignal>; 1] {
    [Metric::new("volume24h", |t: &TokenSignal| t.volume_24h)]
}

/// Scan every family and flatten the hits into report entries.
///
/// Families are scanned leading, coincident, confirming; within a family,
/// items appear in first-detected order with their metrics in catalogue order.
pub fn detect_signal_anomalies(signals: &SignalSet, threshold: f64) -> Vec<ReportAnomaly> {
    let mut out = Vec::new();

    for hit in detect_multi_metric_anomalies(&signals.leading.repos, &repo_metrics(), threshold) {
        out.extend(hit.results.iter().map(|r| r.to_report(SignalFamily::Leading, &hit.item.repo)));
    }
    let programs = &signals.coincident.programs;
    for hit in detect_multi_metric_anomalies(programs, &program_metrics(), threshold) {
        out.extend(
            hit.results
                .iter()
                .map(|r| r.to_report(SignalFamily::Coincident, &hit.item.program_id)),
        );
    }
    let protocols = &signals.confirming.protocols;
    for hit in detect_multi_metric_anomalies(protocols, &protocol_metrics(), threshold) {
        out.extend(
            hit.results
                .iter()
                .map(|r| r.to_report(SignalFamily::Confirming, &hit.item.protocol)),
        );
    }
    let tokens = &signals.confirming.tokens;
    for hit in detect_multi_metric_anomalies(tokens, &token_metrics(), threshold) {
        out.extend(
            hit.results
                .iter()
                .map(|r| r.to_report(SignalFamily::Confirming, &hit.item.token_id)),
        );
    }

    debug!(count = out.len(), threshold, "Signal anomaly scan finished");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(name: &str, stars: u64) -> RepoSignal {
        RepoSignal { repo: name.into(), stars, commits_30d: 10, ..Default::default() }
    }

    #[test]
    fn flags_outlier_repo_by_key() {
        let mut set = SignalSet::default();
        set.leading.repos = vec![
            repo("a", 10),
            repo("b", 12),
            repo("c", 11),
            repo("d", 9),
            repo("e", 10),
            repo("viral", 500),
        ];
        let found = detect_signal_anomalies(&set, 2.0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entity, "viral");
        assert_eq!(found[0].metric, "stars");
        assert_eq!(found[0].family, SignalFamily::Leading);
    }

    #[test]
    fn token_volume_spike_is_confirming() {
        let mut set = SignalSet::default();
        set.confirming.tokens = (0..6)
            .map(|i| TokenSignal {
                token_id: format!("t{i}"),
                volume_24h: if i == 3 { 1_000_000.0 } else { 1_000.0 + i as f64 },
                ..Default::default()
            })
            .collect();
        let found = detect_signal_anomalies(&set, 2.0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entity, "t3");
        assert_eq!(found[0].family, SignalFamily::Confirming);
    }

    #[test]
    fn empty_set_has_no_anomalies() {
        assert!(detect_signal_anomalies(&SignalSet::default(), 0.1).is_empty());
    }
}
