//! # Event Manager & Background Workers
//!
//! This module defines the `EventManager`, which orchestrates all the background services
//! of the reconciliation engine.
//!
//! ## Core Components
//!
//! - [`EventManager`]: The main struct that owns and runs the background workers. It is
//!   consumed when its `run` method is called.
//! - [`EventManagerHandle`]: A clonable, thread-safe handle that provides the public API
//!   for consumers (snapshots, status, change notifications, shutdown).
//! - **Workers**:
//!   - `BackfillScanner`: Walks recent history of every target in throttled batches.
//!   - `LiveListener`: Holds the real-time log subscriptions.
//!   - `ReconnectSupervisor`: Resubscribes the listener with exponential backoff.
//!
//! Both producers write into the shared [`EventStore`]; nothing else is shared.

mod backfill;
mod supervisor;

pub use backfill::{
    BackfillReport, BackfillScanner, BackfillSettings, BackfillState, ScanProgress, TargetReport,
};
pub use supervisor::ReconnectSupervisor;

use crate::{
    config::ConnectorConfig,
    error::{ConfigError, ReentrantRunIgnored},
    events::{Event, WatchTarget},
    listener::{ConnectionState, LiveListener, TargetStatus},
    pubsub::{LogSubscriber, SolanaPubsub},
    rpc::{LedgerRpc, RateLimitedClient, SolanaRpc},
    store::{Anomaly, EventStore},
};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use std::{fmt, sync::Arc};
use tokio::{sync::watch, time::Duration};

/// Resolves once `shutdown` holds `true`, or once every handle has been dropped.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// A point-in-time view of the engine for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub connection: ConnectionState,
    pub backfill: BackfillState,
    pub progress: Option<ScanProgress>,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.progress {
            return write!(f, "Scanning history: {} {}/{}", p.target, p.current, p.total);
        }
        match (self.backfill, self.connection) {
            (BackfillState::Idle, ConnectionState::Connecting) => f.write_str("Initializing..."),
            (BackfillState::Running, _) => f.write_str("Scanning history..."),
            (_, ConnectionState::Live) => f.write_str("Monitoring (live)"),
            (_, ConnectionState::Connecting) => f.write_str("Monitoring (connecting to live stream)"),
            (_, ConnectionState::Degraded) => f.write_str("Monitoring (live stream degraded)"),
            (_, ConnectionState::Failed) => f.write_str("Monitoring (backfill only)"),
        }
    }
}

/// A clonable, thread-safe handle for interacting with the `EventManager`'s background services.
///
/// This handle is the primary public entry point for consumers of the feed. It is
/// obtained when an [`EventManager`] is created and can be cloned and passed across threads.
#[derive(Clone)]
pub struct EventManagerHandle {
    store: Arc<EventStore>,
    scanner: Arc<BackfillScanner>,
    listener: Arc<LiveListener>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl EventManagerHandle {
    /// Signals every background service to stop. Safe to call more than once.
    ///
    /// The backfill scanner stops after its in-flight batch, the supervisor leaves its
    /// backoff sleep, and the listener is unsubscribed before `EventManager::run` returns.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// All events, newest first.
    pub fn snapshot(&self) -> Vec<Event> {
        self.store.snapshot()
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Change notifications for the event feed; the value is the store revision.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.store.subscribe()
    }

    pub fn anomalies(&self) -> Vec<Anomaly> {
        self.store.anomalies()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.listener.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.listener.watch_state()
    }

    /// Subscription status of every watched target.
    pub fn target_statuses(&self) -> Vec<(WatchTarget, TargetStatus)> {
        self.listener.target_statuses()
    }

    pub fn scan_progress(&self) -> Option<ScanProgress> {
        self.scanner.progress()
    }

    pub fn backfill_state(&self) -> BackfillState {
        self.scanner.state()
    }

    pub fn watch_backfill(&self) -> watch::Receiver<BackfillState> {
        self.scanner.watch_state()
    }

    pub fn watch_progress(&self) -> watch::Receiver<Option<ScanProgress>> {
        self.scanner.watch_progress()
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            connection: self.connection_state(),
            backfill: self.backfill_state(),
            progress: self.scan_progress(),
        }
    }

    /// Runs a fresh backfill pass to completion.
    pub async fn backfill(&self) -> Result<BackfillReport, ReentrantRunIgnored> {
        self.scanner.run(self.shutdown.subscribe()).await
    }

    /// Starts a fresh backfill pass in the background.
    ///
    /// Returns [`ReentrantRunIgnored`] if a run is already active.
    pub fn trigger_backfill(&self) -> Result<(), ReentrantRunIgnored> {
        if self.scanner.is_running() {
            return Err(ReentrantRunIgnored);
        }
        let handle = self.clone();
        tokio::spawn(async move {
            if let Err(e) = handle.backfill().await {
                tracing::debug!("{}", e);
            }
        });
        Ok(())
    }

    /// Re-establishes failed or closed live subscriptions. Returns how many are active.
    pub async fn resubscribe(&self) -> usize {
        self.listener.resubscribe().await
    }
}

/// The main background service manager of the engine.
///
/// This struct orchestrates the backfill scanner, the live listener and its reconnect
/// supervisor. It is created once, its [`run()`](EventManager::run) method is spawned as a
/// background task, and it is then consumed, leaving the [`EventManagerHandle`] as the
/// only way to interact with the running services.
pub struct EventManager {
    scanner: Arc<BackfillScanner>,
    listener: Arc<LiveListener>,
    supervisor: ReconnectSupervisor,
    shutdown: watch::Receiver<bool>,
}

impl EventManager {
    /// Creates a new `EventManager` and its associated [`EventManagerHandle`].
    ///
    /// The workers are wired up but not started; call [`run()`](EventManager::run).
    ///
    /// # Arguments
    ///
    /// * `config` - The shared connector configuration.
    /// * `rpc` - The ledger RPC transport used by the backfill scanner.
    /// * `subscriber` - The push-subscription transport used by the live listener.
    pub fn new(
        config: Arc<ConnectorConfig>,
        rpc: Arc<dyn LedgerRpc>,
        subscriber: Arc<dyn LogSubscriber>,
    ) -> Result<(Self, EventManagerHandle), ConfigError> {
        let targets = config.watch_targets()?;
        let store = Arc::new(EventStore::new());

        let rate_limited = Arc::new(RateLimitedClient::new(
            rpc,
            Duration::from_millis(config.backfill.batch_delay_ms),
        ));
        let scanner = Arc::new(BackfillScanner::new(
            targets.clone(),
            rate_limited,
            store.clone(),
            BackfillSettings {
                signature_limit: config.backfill.signature_limit,
                lookback_secs: config.backfill.lookback_secs,
            },
        ));
        let listener = Arc::new(LiveListener::new(
            targets,
            subscriber,
            config.solana.commitment,
            Duration::from_millis(config.live.subscribe_timeout_ms),
            store.clone(),
        ));
        let supervisor = ReconnectSupervisor::new(
            listener.clone(),
            Duration::from_millis(config.live.reconnect_initial_ms),
            Duration::from_millis(config.live.reconnect_max_ms),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = Self {
            scanner: scanner.clone(),
            listener: listener.clone(),
            supervisor,
            shutdown: shutdown_rx,
        };
        let handle = EventManagerHandle {
            store,
            scanner,
            listener,
            shutdown: Arc::new(shutdown_tx),
        };

        Ok((runner, handle))
    }

    /// Creates an `EventManager` talking to the Solana endpoints named in `config`.
    pub fn connect(config: Arc<ConnectorConfig>) -> Result<(Self, EventManagerHandle), ConfigError> {
        let rpc_client = Arc::new(RpcClient::new_with_commitment(
            config.solana.rpc_endpoint(),
            CommitmentConfig {
                commitment: config.solana.commitment,
            },
        ));
        let rpc = Arc::new(SolanaRpc::new(rpc_client, config.solana.commitment));
        let subscriber = Arc::new(SolanaPubsub::new(
            config.solana.ws_endpoint(),
            config.live.notification_buffer,
        ));
        Self::new(config, rpc, subscriber)
    }

    /// Runs all background services of the engine.
    ///
    /// This method consumes the `EventManager` and should be spawned as a single, long-running
    /// background task. The initial backfill and the live subscriptions start concurrently. It
    /// returns after [`EventManagerHandle::stop()`] once every worker has wound down.
    pub async fn run(self) {
        tracing::info!("Engine is running all background services.");
        let Self {
            scanner,
            listener,
            supervisor,
            shutdown,
        } = self;

        let backfill = async {
            match scanner.run(shutdown.clone()).await {
                Ok(report) => tracing::info!(
                    events = report.events(),
                    cancelled = report.cancelled,
                    "Initial backfill done"
                ),
                Err(e) => tracing::debug!("{}", e),
            }
        };
        let live = async {
            listener.subscribe_all().await;
            supervisor.run(shutdown.clone()).await;
        };
        tokio::join!(backfill, live);

        listener.unsubscribe().await;
        tracing::info!("Engine has shut down.");
    }
}
