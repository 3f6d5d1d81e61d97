use crate::config::redact_api_key;
use solana_client::client_error::ClientError;
use thiserror::Error;

/// A failure talking to the upstream ledger RPC endpoint.
///
/// These are recoverable. The RPC client never retries on its own; the caller
/// decides whether a missed window is worth another attempt.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("RPC request failed: {}", redact_api_key(.0))]
    Rpc(#[from] ClientError),

    #[error("Transaction {0} was not returned by the RPC node")]
    MissingTransaction(String),

    #[error("Malformed signature '{0}' in RPC response")]
    InvalidSignature(String),
}

/// A failure setting up a single push subscription.
///
/// Fatal to that subscription only: the listener downgrades its connection
/// state and the feed keeps running on backfill data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionSetupError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("logsSubscribe for {address} was rejected: {reason}")]
    Subscribe { address: String, reason: String },

    #[error("Subscription task for {0} exited before it was ready")]
    Closed(String),
}

/// Returned when a backfill run is requested while another is still active.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("A backfill run is already in progress; request ignored")]
pub struct ReentrantRunIgnored;

/// Errors produced while turning configuration into runtime values.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid watch target address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
}
