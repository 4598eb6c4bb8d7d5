use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source-code activity for one repository (leading family, keyed by `repo`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoSignal {
    pub repo: String,
    pub stars: u64,
    pub forks: u64,
    pub commits_30d: u64,
    pub contributors: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stars_delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forks_delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commits_delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contributors_delta: Option<i64>,
}

/// On-chain activity for one program (coincident family, keyed by `program_id`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramSignal {
    pub program_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub tx_count: u64,
    pub unique_wallets: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallets_delta: Option<i64>,
}

/// DEX volume for one protocol (confirming family, keyed by `protocol`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolVolume {
    pub protocol: String,
    pub volume_24h: f64,
    #[serde(default)]
    pub tvl: f64,
    /// Percent change of `volume_24h`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_delta: Option<f64>,
    /// Percent change of `tvl`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tvl_delta: Option<f64>,
}

/// Market data for one token (confirming family, keyed by `token_id`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSignal {
    pub token_id: String,
    #[serde(default)]
    pub symbol: String,
    pub price_usd: f64,
    pub volume_24h: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_delta: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_delta: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadingSignals {
    #[serde(default)]
    pub repos: Vec<RepoSignal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoincidentSignals {
    #[serde(default)]
    pub programs: Vec<ProgramSignal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmingSignals {
    #[serde(default)]
    pub protocols: Vec<ProtocolVolume>,
    #[serde(default)]
    pub tokens: Vec<TokenSignal>,
}

/// One collected snapshot across all three families.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalSet {
    #[serde(default)]
    pub leading: LeadingSignals,
    #[serde(default)]
    pub coincident: CoincidentSignals,
    #[serde(default)]
    pub confirming: ConfirmingSignals,
}

impl SignalSet {
    /// Append every record of `other`, preserving order.
    pub fn merge(&mut self, other: SignalSet) {
        self.leading.repos.extend(other.leading.repos);
        self.coincident.programs.extend(other.coincident.programs);
        self.confirming.protocols.extend(other.confirming.protocols);
        self.confirming.tokens.extend(other.confirming.tokens);
    }

    /// Total number of records across all families.
    pub fn len(&self) -> usize {
        self.leading.repos.len()
            + self.coincident.programs.len()
            + self.confirming.protocols.len()
            + self.confirming.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which family an anomaly was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalFamily {
    Leading,
    Coincident,
    Confirming,
}

impl fmt::Display for SignalFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalFamily::Leading => write!(f, "leading"),
            SignalFamily::Coincident => write!(f, "coincident"),
            SignalFamily::Confirming => write!(f, "confirming"),
        }
    }
}

/// An anomaly as embedded in a persisted report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportAnomaly {
    pub family: SignalFamily,
    /// Natural key of the anomalous record.
    pub entity: String,
    pub metric: String,
    pub value: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub z_score: f64,
}

/// A dated report, one per successful cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// `YYYY-MM-DD` (UTC).
    pub date: String,
    pub generated_at: DateTime<Utc>,
    pub signals: SignalSet,
    #[serde(default)]
    pub anomalies: Vec<ReportAnomaly>,
}

impl Report {
    pub fn new(
        generated_at: DateTime<Utc>,
        signals: SignalSet,
        anomalies: Vec<ReportAnomaly>,
    ) -> Self {
        Self {
            date: generated_at.format("%Y-%m-%d").to_string(),
            generated_at,
            signals,
            anomalies,
        }
    }
}
