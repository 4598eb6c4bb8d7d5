//! Period-over-period deltas against the previous report.
//!
//! Count-like metrics get absolute deltas, volume-like metrics get percent
//! deltas. A delta is only set when the same key existed in the previous
//! report; an unset delta means "no baseline", never "no change".

use std::collections::HashMap;

use signalforge_core::{
    CoincidentSignals, ConfirmingSignals, LeadingSignals, ProgramSignal, ProtocolVolume,
    RepoSignal, Report, SignalSet, TokenSignal,
};
use tracing::debug;

/// `current - previous`, saturating at the `i64` range.
pub fn absolute_delta(current: u64, previous: u64) -> i64 {
    if current >= previous {
        i64::try_from(current - previous).unwrap_or(i64::MAX)
    } else {
        i64::try_from(previous - current).map(|d| -d).unwrap_or(i64::MIN)
    }
}

/// `(current - previous) / previous * 100`, or `None` when `previous` is zero.
pub fn percent_delta(current: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 {
        return None;
    }
    Some((current - previous) / previous * 100.0)
}

/// Enrich a freshly collected set with deltas against `previous`.
///
/// Any delta already present on `current` is discarded first, so the result
/// only ever reflects this comparison. With no previous report every delta
/// is left unset.
pub fn apply_deltas(current: SignalSet, previous: Option<&Report>) -> SignalSet {
    let empty = SignalSet::default();
    let baseline = match previous {
        Some(report) => &report.signals,
        None => {
            debug!("No previous report; deltas left unset");
            &empty
        }
    };

    SignalSet {
        leading: apply_leading(current.leading, &baseline.leading),
        coincident: apply_coincident(current.coincident, &baseline.coincident),
        confirming: apply_confirming(current.confirming, &baseline.confirming),
    }
}

pub fn apply_leading(current: LeadingSignals, previous: &LeadingSignals) -> LeadingSignals {
    let lookup = index_by(&previous.repos, |r| r.repo.as_str());
    let repos = current
        .repos
        .into_iter()
        .map(|repo| {
            let prev = lookup.get(repo.repo.as_str()).copied();
            RepoSignal {
                stars_delta: prev.map(|p| absolute_delta(repo.stars, p.stars)),
                forks_delta: prev.map(|p| absolute_delta(repo.forks, p.forks)),
                commits_delta: prev.map(|p| absolute_delta(repo.commits_30d, p.commits_30d)),
                contributors_delta: prev.map(|p| absolute_delta(repo.contributors, p.contributors)),
                ..repo
            }
        })
        .collect();
    LeadingSignals { repos }
}

pub fn apply_coincident(
    current: CoincidentSignals,
    previous: &CoincidentSignals,
) -> CoincidentSignals {
    let lookup = index_by(&previous.programs, |p| p.program_id.as_str());
    let programs = current
        .programs
        .into_iter()
        .map(|program| {
            let prev = lookup.get(program.program_id.as_str()).copied();
            ProgramSignal {
                tx_delta: prev.map(|p| absolute_delta(program.tx_count, p.tx_count)),
                wallets_delta: prev
                    .map(|p| absolute_delta(program.unique_wallets, p.unique_wallets)),
                ..program
            }
        })
        .collect();
    CoincidentSignals { programs }
}

pub fn apply_confirming(
    current: ConfirmingSignals,
    previous: &ConfirmingSignals,
) -> ConfirmingSignals {
    let protocol_lookup = index_by(&previous.protocols, |p| p.protocol.as_str());
    let protocols = current
        .protocols
        .into_iter()
        .map(|protocol| {
            let prev = protocol_lookup.get(protocol.protocol.as_str()).copied();
            ProtocolVolume {
                volume_delta: prev.and_then(|p| percent_delta(protocol.volume_24h, p.volume_24h)),
                tvl_delta: prev.and_then(|p| percent_delta(protocol.tvl, p.tvl)),
                ..protocol
            }
        })
        .collect();

    let token_lookup = index_by(&previous.tokens, |t| t.token_id.as_str());
    let tokens = current
        .tokens
        .into_iter()
        .map(|token| {
            let prev = token_lookup.get(token.token_id.as_str()).copied();
            TokenSignal {
                price_delta: prev.and_then(|p| percent_delta(token.price_usd, p.price_usd)),
                volume_delta: prev.and_then(|p| percent_delta(token.volume_24h, p.volume_24h)),
                ..token
            }
        })
        .collect();

    ConfirmingSignals { protocols, tokens }
}

/// Key lookup over previous records; on duplicate keys the last one wins.
fn index_by<'a, T>(records: &'a [T], key: impl Fn(&'a T) -> &'a str) -> HashMap<&'a str, &'a T> {
    records.iter().map(|r| (key(r), r)).collect()
}
