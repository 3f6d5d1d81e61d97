#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    events::{WatchKind, WatchTarget},
};
use solana_sdk::{commitment_config::CommitmentLevel, pubkey::Pubkey};
use std::{fmt, str::FromStr};

/// The upgradeable BPF loader; every program deploy and upgrade goes through it.
pub const BPF_LOADER_UPGRADEABLE_ID: &str = "BPFLoaderUpgradeab1e11111111111111111111111";
/// The Squads v4 multisig program.
pub const SQUADS_V4_ID: &str = "SMPLecH2AezpSws9asubG7v6gde66S5S6p7J93rAnp7";

/// The top-level configuration for the `builderwatch-connector` library.
///
/// This struct aggregates the Solana endpoints, the backfill and live stream
/// behavior, and the list of watched addresses. It is typically deserialized
/// from a configuration file and passed to the `EventManager` on creation.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub struct ConnectorConfig {
    #[cfg_attr(feature = "serde", serde(default))]
    pub solana: Solana,
    #[cfg_attr(feature = "serde", serde(default))]
    pub backfill: Backfill,
    #[cfg_attr(feature = "serde", serde(default))]
    pub live: Live,
    #[cfg_attr(feature = "serde", serde(default = "default_targets"))]
    pub targets: Vec<TargetConfig>,
}

/// Defines the connection settings for the Solana cluster.
///
/// `Debug` masks the API key and any query string of the URLs.
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case", default))]
pub struct Solana {
    pub rpc_url: String,
    pub ws_url: String,
    /// Optional provider credential, appended to both URLs as `api-key`.
    #[cfg_attr(feature = "serde", serde(default))]
    pub api_key: Option<String>,
    #[cfg_attr(feature = "serde", serde(with = "serde_commitment"))]
    pub commitment: CommitmentLevel,
}

/// Controls the historical scan.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case", default))]
pub struct Backfill {
    /// Maximum number of signatures fetched per target and run.
    pub signature_limit: usize,
    /// Mandatory pause between two consecutive RPC calls, in milliseconds.
    pub batch_delay_ms: u64,
    /// Signatures older than this many seconds are skipped. `None` means no limit.
    pub lookback_secs: Option<u64>,
}

/// Controls the live subscription and its reconnection policy.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case", default))]
pub struct Live {
    /// First delay before a resubscribe attempt after a disconnect.
    pub reconnect_initial_ms: u64,
    /// Upper bound for the exponential reconnect delay.
    pub reconnect_max_ms: u64,
    /// Buffer capacity of each subscription's notification channel.
    pub notification_buffer: usize,
    /// Upper bound for setting up a single subscription.
    pub subscribe_timeout_ms: u64,
}

/// A watched address as written in the configuration file.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub struct TargetConfig {
    pub address: String,
    pub kind: WatchKind,
    pub label: String,
}

impl Default for Solana {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            ws_url: "wss://api.mainnet-beta.solana.com".to_string(),
            api_key: None,
            commitment: CommitmentLevel::Confirmed,
        }
    }
}

impl Default for Backfill {
    fn default() -> Self {
        Self {
            signature_limit: 1000,
            batch_delay_ms: 250,
            lookback_secs: Some(14 * 24 * 60 * 60),
        }
    }
}

impl Default for Live {
    fn default() -> Self {
        Self {
            reconnect_initial_ms: 1_000,
            reconnect_max_ms: 60_000,
            notification_buffer: 256,
            subscribe_timeout_ms: 10_000,
        }
    }
}

pub fn default_targets() -> Vec<TargetConfig> {
    vec![
        TargetConfig {
            address: BPF_LOADER_UPGRADEABLE_ID.to_string(),
            kind: WatchKind::Deploy,
            label: "Program".to_string(),
        },
        TargetConfig {
            address: SQUADS_V4_ID.to_string(),
            kind: WatchKind::Multisig,
            label: "Squad".to_string(),
        },
    ]
}

impl Solana {
    /// The JSON-RPC endpoint, with the API key attached when one is configured.
    pub fn rpc_endpoint(&self) -> String {
        with_api_key(&self.rpc_url, self.api_key.as_deref())
    }

    /// The PubSub endpoint, with the API key attached when one is configured.
    pub fn ws_endpoint(&self) -> String {
        with_api_key(&self.ws_url, self.api_key.as_deref())
    }
}

impl fmt::Debug for Solana {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Solana")
            .field("rpc_url", &redact_url(&self.rpc_url))
            .field("ws_url", &redact_url(&self.ws_url))
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("commitment", &self.commitment)
            .finish()
    }
}

/// Strips the query string, where providers put credentials.
pub fn redact_url(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{base}?<redacted>"),
        None => url.to_string(),
    }
}

/// Masks every `api-key=` value in free text, such as transport error messages.
pub fn redact_api_key(text: impl fmt::Display) -> String {
    const MARKER: &str = "api-key=";
    let text = text.to_string();
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(at) = rest.find(MARKER) {
        let value_start = at + MARKER.len();
        out.push_str(&rest[..value_start]);
        out.push_str("<redacted>");
        let tail = &rest[value_start..];
        let value_len = tail
            .find(|c: char| c == '&' || c == ')' || c == '"' || c.is_whitespace())
            .unwrap_or(tail.len());
        rest = &tail[value_len..];
    }
    out.push_str(rest);
    out
}

fn with_api_key(url: &str, api_key: Option<&str>) -> String {
    match api_key {
        Some(key) if !key.is_empty() => {
            let sep = if url.contains('?') { '&' } else { '?' };
            format!("{url}{sep}api-key={key}")
        }
        _ => url.to_string(),
    }
}

impl TargetConfig {
    pub fn to_watch_target(&self) -> Result<WatchTarget, ConfigError> {
        let address =
            Pubkey::from_str(&self.address).map_err(|e| ConfigError::InvalidAddress {
                address: self.address.clone(),
                reason: e.to_string(),
            })?;
        Ok(WatchTarget::new(address, self.kind, self.label.clone()))
    }
}

impl ConnectorConfig {
    /// Parses the configured targets. An empty list falls back to the defaults.
    pub fn watch_targets(&self) -> Result<Vec<WatchTarget>, ConfigError> {
        if self.targets.is_empty() {
            return default_targets()
                .iter()
                .map(TargetConfig::to_watch_target)
                .collect();
        }
        self.targets
            .iter()
            .map(TargetConfig::to_watch_target)
            .collect()
    }
}

#[cfg(feature = "serde")]
mod serde_commitment {

    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(c: &CommitmentLevel, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = match c {
            CommitmentLevel::Processed => "processed",
            CommitmentLevel::Confirmed => "confirmed",
            CommitmentLevel::Finalized => "finalized",
        };
        serializer.serialize_str(s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<CommitmentLevel, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "processed" => Ok(CommitmentLevel::Processed),
            "confirmed" => Ok(CommitmentLevel::Confirmed),
            "finalized" => Ok(CommitmentLevel::Finalized),
            other => Err(serde::de::Error::custom(format!(
                "unknown commitment level '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_is_appended_to_both_endpoints() {
        let solana = Solana {
            rpc_url: "https://rpc.example.com".to_string(),
            ws_url: "wss://rpc.example.com/?cluster=main".to_string(),
            api_key: Some("k3y".to_string()),
            commitment: CommitmentLevel::Confirmed,
        };
        assert_eq!(solana.rpc_endpoint(), "https://rpc.example.com?api-key=k3y");
        assert_eq!(
            solana.ws_endpoint(),
            "wss://rpc.example.com/?cluster=main&api-key=k3y"
        );
    }

    #[test]
    fn debug_output_hides_credentials() {
        let solana = Solana {
            rpc_url: "https://rpc.example.com/?token=inline".to_string(),
            api_key: Some("TOPSECRET".to_string()),
            ..Default::default()
        };
        let config = ConnectorConfig {
            solana: solana.clone(),
            ..Default::default()
        };
        let printed = format!("{config:#?}");
        assert!(!printed.contains("TOPSECRET"));
        assert!(!printed.contains("inline"));
        assert!(printed.contains("<redacted>"));
        assert!(printed.contains("https://rpc.example.com/"));

        assert_eq!(
            redact_url(&solana.ws_endpoint()),
            "wss://api.mainnet-beta.solana.com?<redacted>"
        );
    }

    #[test]
    fn api_keys_are_masked_in_error_text() {
        let text = "error sending request for url (https://rpc.example.com/?api-key=abc123&x=1)";
        assert_eq!(
            redact_api_key(text),
            "error sending request for url (https://rpc.example.com/?api-key=<redacted>&x=1)"
        );
        assert_eq!(redact_api_key("no secrets here"), "no secrets here");
    }

    #[test]
    fn endpoints_are_untouched_without_a_key() {
        let solana = Solana::default();
        assert_eq!(solana.rpc_endpoint(), solana.rpc_url);
    }

    #[test]
    fn default_targets_parse() {
        let targets = ConnectorConfig::default().watch_targets().unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].kind, WatchKind::Deploy);
        assert_eq!(targets[1].kind, WatchKind::Multisig);
    }

    #[test]
    fn bad_address_is_rejected() {
        let config = ConnectorConfig {
            targets: vec![TargetConfig {
                address: "not-a-key".to_string(),
                kind: WatchKind::Deploy,
                label: "Broken".to_string(),
            }],
            ..Default::default()
        };
        assert!(matches!(
            config.watch_targets(),
            Err(ConfigError::InvalidAddress { .. })
        ));
    }
}
