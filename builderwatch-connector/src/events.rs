use chrono::{DateTime, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::fmt;

/// What a watched address is monitored for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum WatchKind {
    /// Program deployments and upgrades through the upgradeable loader.
    Deploy,
    /// Multisig creations on a governance program.
    Multisig,
}

/// An on-chain address plus the kind of activity it is watched for.
///
/// Built once from configuration and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub address: Pubkey,
    pub kind: WatchKind,
    pub label: String,
}

impl WatchTarget {
    pub fn new(address: Pubkey, kind: WatchKind, label: impl Into<String>) -> Self {
        Self {
            address,
            kind,
            label: label.into(),
        }
    }
}

/// Indicates which producer created an `Event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EventSource {
    /// Found by the backfill scanner in historical transactions.
    Historical,
    /// Received from the real-time log subscription.
    Live,
}

/// The classes of on-chain activity the feed reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EventKind {
    NewDeploy,
    ProgramUpgrade,
    NewMultisig,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::NewDeploy => "NEW_DEPLOY",
            EventKind::ProgramUpgrade => "PROGRAM_UPGRADE",
            EventKind::NewMultisig => "NEW_MULTISIG",
        };
        f.write_str(s)
    }
}

/// The canonical unit of the feed, keyed by transaction signature.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Event {
    pub signature: String,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
    pub detail: String,
    pub source: EventSource,
}

impl Event {
    /// Link to the transaction on a public explorer.
    pub fn explorer_url(&self) -> String {
        format!("https://solscan.io/tx/{}", self.signature)
    }
}

/// Log lines of a single transaction or notification, ready for classification.
///
/// Transient: the classifier consumes it and nothing keeps it afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLogRecord {
    pub signature: String,
    pub logs: Vec<String>,
    /// Unix seconds. `None` for live notifications.
    pub block_time: Option<i64>,
    /// Set when the transaction itself failed on-chain.
    pub failed: bool,
    pub source: EventSource,
}

/// A single entry returned by `getSignaturesForAddress`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInfo {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub failed: bool,
}

/// A log notification delivered by the push subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogNotification {
    pub signature: String,
    pub logs: Vec<String>,
    pub failed: bool,
}

impl LogNotification {
    /// Converts the notification into a record; live records carry no block time.
    pub fn into_record(self) -> RawLogRecord {
        RawLogRecord {
            signature: self.signature,
            logs: self.logs,
            block_time: None,
            failed: self.failed,
            source: EventSource::Live,
        }
    }
}
