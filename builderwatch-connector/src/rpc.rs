//! # Rate-Limited RPC Client
//!
//! Two layers:
//!
//! - [`LedgerRpc`]: the raw transport seam. [`SolanaRpc`] implements it on the
//!   nonblocking `RpcClient`; tests plug in their own implementation.
//! - [`RateLimitedClient`]: wraps any transport with pagination, fixed-size
//!   transaction batches and a mandatory delay between consecutive calls.
//!
//! Neither layer retries. Failures come back as [`TransportError`] and the
//! caller decides what a missed window is worth.

use crate::{
    error::TransportError,
    events::{EventSource, RawLogRecord, SignatureInfo},
};
use async_trait::async_trait;
use futures::future;
use solana_client::{
    nonblocking::rpc_client::RpcClient, rpc_client::GetConfirmedSignaturesForAddress2Config,
    rpc_config::RpcTransactionConfig,
};
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    pubkey::Pubkey,
    signature::Signature,
};
use solana_transaction_status::{EncodedConfirmedTransactionWithStatusMeta, UiTransactionEncoding};
use std::{str::FromStr, sync::Arc};
use tokio::{
    sync::Mutex,
    time::{sleep_until, Duration, Instant},
};

/// Number of transactions requested per batch.
pub const TX_BATCH_SIZE: usize = 20;
/// Largest page `getSignaturesForAddress` will return.
pub const MAX_SIGNATURE_PAGE: usize = 1000;

/// The raw ledger RPC surface used by the engine.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Returns up to `limit` signatures for `address`, newest first, starting
    /// strictly before `before` when given.
    async fn list_signatures(
        &self,
        address: &Pubkey,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<SignatureInfo>, TransportError>;

    /// Fetches the given transactions. The result is aligned with `signatures`.
    async fn get_transactions(
        &self,
        signatures: &[String],
    ) -> Result<Vec<RawLogRecord>, TransportError>;
}

/// [`LedgerRpc`] over the Solana JSON-RPC API.
pub struct SolanaRpc {
    client: Arc<RpcClient>,
    commitment: CommitmentLevel,
}

impl SolanaRpc {
    pub fn new(client: Arc<RpcClient>, commitment: CommitmentLevel) -> Self {
        Self { client, commitment }
    }

    async fn get_transaction(&self, signature: &str) -> Result<RawLogRecord, TransportError> {
        let sig = Signature::from_str(signature)
            .map_err(|_| TransportError::InvalidSignature(signature.to_string()))?;
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(CommitmentConfig {
                commitment: self.commitment,
            }),
            max_supported_transaction_version: Some(0),
        };
        let tx = self.client.get_transaction_with_config(&sig, config).await?;
        Ok(to_record(signature, tx))
    }
}

/// A transaction without status metadata is kept as an empty, successful record
/// so the rest of its batch still gets classified.
fn to_record(signature: &str, tx: EncodedConfirmedTransactionWithStatusMeta) -> RawLogRecord {
    let (logs, failed) = match tx.transaction.meta {
        Some(meta) => {
            let logs: Option<Vec<String>> = meta.log_messages.into();
            (logs.unwrap_or_default(), meta.err.is_some())
        }
        None => {
            tracing::debug!(%signature, "Transaction returned without metadata");
            (Vec::new(), false)
        }
    };

    RawLogRecord {
        signature: signature.to_string(),
        logs,
        block_time: tx.block_time,
        failed,
        source: EventSource::Historical,
    }
}

#[async_trait]
impl LedgerRpc for SolanaRpc {
    async fn list_signatures(
        &self,
        address: &Pubkey,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<SignatureInfo>, TransportError> {
        let before = before
            .map(|s| {
                Signature::from_str(s).map_err(|_| TransportError::InvalidSignature(s.to_string()))
            })
            .transpose()?;
        let config = GetConfirmedSignaturesForAddress2Config {
            before,
            until: None,
            limit: Some(limit),
            commitment: Some(CommitmentConfig {
                commitment: self.commitment,
            }),
        };
        let page = self
            .client
            .get_signatures_for_address_with_config(address, config)
            .await?;

        Ok(page
            .into_iter()
            .map(|s| SignatureInfo {
                signature: s.signature,
                slot: s.slot,
                block_time: s.block_time,
                failed: s.err.is_some(),
            })
            .collect())
    }

    async fn get_transactions(
        &self,
        signatures: &[String],
    ) -> Result<Vec<RawLogRecord>, TransportError> {
        future::try_join_all(signatures.iter().map(|sig| self.get_transaction(sig))).await
    }
}

/// Wraps a [`LedgerRpc`] with pagination, batching and throttling.
///
/// Every call is followed by the configured delay: the next call, of any kind,
/// does not start until `delay` has elapsed since the previous one finished.
pub struct RateLimitedClient {
    inner: Arc<dyn LedgerRpc>,
    delay: Duration,
    next_allowed: Mutex<Option<Instant>>,
}

impl RateLimitedClient {
    pub fn new(inner: Arc<dyn LedgerRpc>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            next_allowed: Mutex::new(None),
        }
    }

    pub fn batch_size(&self) -> usize {
        TX_BATCH_SIZE
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Waits until the delay since the previous call has elapsed.
    ///
    /// Cancel-safe: dropping the future before it resolves leaves the schedule
    /// untouched.
    pub async fn throttle(&self) {
        let next = *self.next_allowed.lock().await;
        if let Some(at) = next {
            sleep_until(at).await;
        }
    }

    async fn call<T, F>(&self, fut: F) -> Result<T, TransportError>
    where
        F: std::future::Future<Output = Result<T, TransportError>>,
    {
        let mut next_allowed = self.next_allowed.lock().await;
        if let Some(at) = *next_allowed {
            sleep_until(at).await;
        }
        let result = fut.await;
        *next_allowed = Some(Instant::now() + self.delay);
        result
    }

    /// Lists up to `limit` signatures for `address`, newest first, paging
    /// backwards through history as needed.
    pub async fn list_signatures(
        &self,
        address: &Pubkey,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, TransportError> {
        let mut collected: Vec<SignatureInfo> = Vec::new();
        let mut before: Option<String> = None;

        while collected.len() < limit {
            let page_size = (limit - collected.len()).min(MAX_SIGNATURE_PAGE);
            let page = self
                .call(self.inner.list_signatures(address, page_size, before.as_deref()))
                .await?;
            let exhausted = page.len() < page_size;
            before = page.last().map(|s| s.signature.clone());
            collected.extend(page);
            if exhausted || before.is_none() {
                break;
            }
        }

        collected.truncate(limit);
        Ok(collected)
    }

    /// Fetches a single batch of at most [`TX_BATCH_SIZE`] transactions.
    pub async fn get_transaction_batch(
        &self,
        batch: &[String],
    ) -> Result<Vec<RawLogRecord>, TransportError> {
        debug_assert!(batch.len() <= TX_BATCH_SIZE);
        self.call(self.inner.get_transactions(batch)).await
    }

    /// Fetches any number of transactions, split into throttled batches.
    pub async fn get_transactions(
        &self,
        signatures: &[String],
    ) -> Result<Vec<RawLogRecord>, TransportError> {
        let mut records = Vec::with_capacity(signatures.len());
        for batch in signatures.chunks(TX_BATCH_SIZE) {
            records.extend(self.get_transaction_batch(batch).await?);
        }
        Ok(records)
    }
}
