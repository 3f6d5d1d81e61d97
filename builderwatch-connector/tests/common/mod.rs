#![allow(dead_code)]

use async_trait::async_trait;
use builderwatch_connector::{
    config::{Backfill, ConnectorConfig, Live, TargetConfig},
    error::{SubscriptionSetupError, TransportError},
    events::{EventSource, LogNotification, RawLogRecord, SignatureInfo},
    pubsub::LogSubscriber,
    rpc::LedgerRpc,
    WatchKind,
};
use solana_sdk::{commitment_config::CommitmentLevel, pubkey::Pubkey};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};
use tokio::{sync::mpsc, time::Instant};

pub const DEPLOY_LOG: &str = "Program log: Instruction: DeployWithMaxDataLen";
pub const UPGRADE_LOG: &str = "Program log: Program upgraded";
pub const MULTISIG_LOG: &str = "Program log: Instruction: MultisigCreate";
pub const NOISE_LOG: &str = "Program log: Instruction: Transfer";

/// Which RPC method a recorded call hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListSignatures { limit: usize },
    GetTransactions { count: usize },
}

/// A canned transaction history per address.
#[derive(Default)]
pub struct MockLedger {
    history: HashMap<Pubkey, Vec<SignatureInfo>>,
    transactions: HashMap<String, RawLogRecord>,
    /// A batch containing one of these signatures fails as a whole.
    poisoned: HashSet<String>,
    /// Addresses whose signature listing fails.
    broken: HashSet<Pubkey>,
    calls: Mutex<Vec<(Instant, Call)>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a transaction to `address`'s history. Call newest first.
    pub fn push_tx(&mut self, address: Pubkey, signature: &str, block_time: i64, logs: &[&str], failed: bool) {
        self.history.entry(address).or_default().push(SignatureInfo {
            signature: signature.to_string(),
            slot: block_time as u64,
            block_time: Some(block_time),
            failed,
        });
        self.transactions.insert(
            signature.to_string(),
            RawLogRecord {
                signature: signature.to_string(),
                logs: logs.iter().map(|s| s.to_string()).collect(),
                block_time: Some(block_time),
                failed,
                source: EventSource::Historical,
            },
        );
    }

    pub fn poison(&mut self, signature: &str) {
        self.poisoned.insert(signature.to_string());
    }

    pub fn break_address(&mut self, address: Pubkey) {
        self.broken.insert(address);
    }

    pub fn calls(&self) -> Vec<(Instant, Call)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push((Instant::now(), call));
    }
}

#[async_trait]
impl LedgerRpc for MockLedger {
    async fn list_signatures(
        &self,
        address: &Pubkey,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<SignatureInfo>, TransportError> {
        self.record(Call::ListSignatures { limit });
        if self.broken.contains(address) {
            return Err(TransportError::MissingTransaction(format!("history of {address}")));
        }
        let history = self.history.get(address).cloned().unwrap_or_default();
        let start = match before {
            Some(sig) => history
                .iter()
                .position(|s| s.signature == sig)
                .map(|i| i + 1)
                .unwrap_or(history.len()),
            None => 0,
        };
        Ok(history.into_iter().skip(start).take(limit).collect())
    }

    async fn get_transactions(
        &self,
        signatures: &[String],
    ) -> Result<Vec<RawLogRecord>, TransportError> {
        self.record(Call::GetTransactions {
            count: signatures.len(),
        });
        if let Some(bad) = signatures.iter().find(|s| self.poisoned.contains(*s)) {
            return Err(TransportError::MissingTransaction(bad.clone()));
        }
        signatures
            .iter()
            .map(|s| {
                self.transactions
                    .get(s)
                    .cloned()
                    .ok_or_else(|| TransportError::MissingTransaction(s.clone()))
            })
            .collect()
    }
}

/// Hands out in-memory channels instead of WebSocket subscriptions.
#[derive(Default)]
pub struct MockSubscriber {
    senders: Mutex<HashMap<Pubkey, mpsc::Sender<LogNotification>>>,
    failing: Mutex<HashSet<Pubkey>>,
    pub subscribe_calls: AtomicUsize,
    calls_per_address: Mutex<HashMap<Pubkey, usize>>,
}

impl MockSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, address: Pubkey) {
        self.failing.lock().unwrap().insert(address);
    }

    pub fn heal(&self, address: Pubkey) {
        self.failing.lock().unwrap().remove(&address);
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls_for(&self, address: Pubkey) -> usize {
        self.calls_per_address
            .lock()
            .unwrap()
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    /// Delivers a notification; returns `false` if nobody is subscribed.
    pub async fn push(&self, address: Pubkey, signature: &str, logs: &[&str], failed: bool) -> bool {
        let sender = self.senders.lock().unwrap().get(&address).cloned();
        match sender {
            Some(tx) => tx
                .send(LogNotification {
                    signature: signature.to_string(),
                    logs: logs.iter().map(|s| s.to_string()).collect(),
                    failed,
                })
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Simulates the upstream closing the stream for `address`.
    pub fn disconnect(&self, address: Pubkey) {
        self.senders.lock().unwrap().remove(&address);
    }

    /// `true` once the receiving side for `address` has been dropped.
    pub fn is_closed(&self, address: Pubkey) -> bool {
        self.senders
            .lock()
            .unwrap()
            .get(&address)
            .map(|tx| tx.is_closed())
            .unwrap_or(true)
    }
}

#[async_trait]
impl LogSubscriber for MockSubscriber {
    async fn subscribe(
        &self,
        address: Pubkey,
        _commitment: CommitmentLevel,
    ) -> Result<mpsc::Receiver<LogNotification>, SubscriptionSetupError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls_per_address
            .lock()
            .unwrap()
            .entry(address)
            .or_default() += 1;
        if self.failing.lock().unwrap().contains(&address) {
            return Err(SubscriptionSetupError::Connect {
                url: "ws://mock".to_string(),
                reason: "refused".to_string(),
            });
        }
        let (tx, rx) = mpsc::channel(16);
        self.senders.lock().unwrap().insert(address, tx);
        Ok(rx)
    }
}

pub fn target(address: Pubkey, kind: WatchKind, label: &str) -> TargetConfig {
    TargetConfig {
        address: address.to_string(),
        kind,
        label: label.to_string(),
    }
}

/// A config with no lookback window and a 250 ms batch delay.
pub fn test_config(targets: Vec<TargetConfig>) -> ConnectorConfig {
    ConnectorConfig {
        backfill: Backfill {
            signature_limit: 1000,
            batch_delay_ms: 250,
            lookback_secs: None,
        },
        live: Live {
            reconnect_initial_ms: 1_000,
            reconnect_max_ms: 8_000,
            notification_buffer: 16,
            subscribe_timeout_ms: 5_000,
        },
        targets,
        ..Default::default()
    }
}
