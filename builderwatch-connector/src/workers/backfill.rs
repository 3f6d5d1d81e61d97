use crate::{
    classifier::classify,
    error::ReentrantRunIgnored,
    events::{SignatureInfo, WatchTarget},
    rpc::RateLimitedClient,
    store::EventStore,
    workers::shutdown_requested,
};
use chrono::Utc;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::watch;

/// Run state of the backfill scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillState {
    Idle,
    Running,
    Completed,
    /// Every target failed during the last run.
    Failed,
}

/// Progress of the target currently being scanned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanProgress {
    pub target: String,
    /// Signatures processed so far.
    pub current: usize,
    /// Signatures discovered for this target.
    pub total: usize,
}

/// Outcome of one target within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub label: String,
    pub discovered: usize,
    pub processed: usize,
    pub events: usize,
    /// Set when the target was abandoned because of an RPC failure.
    pub error: Option<String>,
}

/// Outcome of a full backfill run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    pub targets: Vec<TargetReport>,
    /// The run stopped early because shutdown was requested.
    pub cancelled: bool,
}

impl BackfillReport {
    pub fn events(&self) -> usize {
        self.targets.iter().map(|t| t.events).sum()
    }
}

/// Settings for a [`BackfillScanner`].
#[derive(Debug, Clone)]
pub struct BackfillSettings {
    pub signature_limit: usize,
    pub lookback_secs: Option<u64>,
}

/// Walks a bounded window of historical signatures for every target and feeds
/// classified events into the store.
///
/// Only one run may be active at a time; overlapping calls to [`run`](Self::run)
/// return [`ReentrantRunIgnored`] without side effects.
pub struct BackfillScanner {
    targets: Vec<WatchTarget>,
    rpc: Arc<RateLimitedClient>,
    store: Arc<EventStore>,
    settings: BackfillSettings,
    running: AtomicBool,
    state: watch::Sender<BackfillState>,
    progress: watch::Sender<Option<ScanProgress>>,
}

/// Releases the run flag even if the run future is dropped half-way.
struct RunGuard<'a> {
    scanner: &'a BackfillScanner,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.scanner.progress.send_replace(None);
        self.scanner.state.send_if_modified(|state| {
            if *state == BackfillState::Running {
                *state = BackfillState::Idle;
                true
            } else {
                false
            }
        });
        self.scanner.running.store(false, Ordering::Release);
    }
}

impl BackfillScanner {
    pub fn new(
        targets: Vec<WatchTarget>,
        rpc: Arc<RateLimitedClient>,
        store: Arc<EventStore>,
        settings: BackfillSettings,
    ) -> Self {
        let (state, _) = watch::channel(BackfillState::Idle);
        let (progress, _) = watch::channel(None);
        Self {
            targets,
            rpc,
            store,
            settings,
            running: AtomicBool::new(false),
            state,
            progress,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn state(&self) -> BackfillState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<BackfillState> {
        self.state.subscribe()
    }

    pub fn progress(&self) -> Option<ScanProgress> {
        self.progress.borrow().clone()
    }

    pub fn watch_progress(&self) -> watch::Receiver<Option<ScanProgress>> {
        self.progress.subscribe()
    }

    /// Runs one backfill pass over every target, in order.
    ///
    /// A target whose RPC calls fail is abandoned and the run moves on to the
    /// next one. Once `shutdown` flips to `true` no further batch is issued; the
    /// batch already in flight is allowed to finish.
    pub async fn run(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<BackfillReport, ReentrantRunIgnored> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Backfill requested while a run is active; ignoring");
            return Err(ReentrantRunIgnored);
        }
        let _guard = RunGuard { scanner: self };
        self.state.send_replace(BackfillState::Running);
        tracing::info!(targets = self.targets.len(), "Starting backfill run");

        let mut report = BackfillReport {
            targets: Vec::with_capacity(self.targets.len()),
            cancelled: false,
        };
        for target in &self.targets {
            if *shutdown.borrow() {
                report.cancelled = true;
                break;
            }
            let (target_report, cancelled) = self.scan_target(target, &mut shutdown).await;
            report.targets.push(target_report);
            if cancelled {
                report.cancelled = true;
                break;
            }
        }

        if report.cancelled {
            tracing::info!("Backfill run cancelled");
            return Ok(report);
        }

        let all_failed =
            !report.targets.is_empty() && report.targets.iter().all(|t| t.error.is_some());
        let final_state = if all_failed {
            BackfillState::Failed
        } else {
            BackfillState::Completed
        };
        self.state.send_replace(final_state);
        tracing::info!(
            events = report.events(),
            state = ?final_state,
            "Backfill run finished"
        );
        Ok(report)
    }

    async fn scan_target(
        &self,
        target: &WatchTarget,
        shutdown: &mut watch::Receiver<bool>,
    ) -> (TargetReport, bool) {
        let mut report = TargetReport {
            label: target.label.clone(),
            discovered: 0,
            processed: 0,
            events: 0,
            error: None,
        };

        let signatures = match self
            .rpc
            .list_signatures(&target.address, self.settings.signature_limit)
            .await
        {
            Ok(signatures) => signatures,
            Err(e) => {
                tracing::error!(label = %target.label, "Failed to list signatures: {}", e);
                report.error = Some(e.to_string());
                return (report, false);
            }
        };

        let cutoff = self
            .settings
            .lookback_secs
            .map(|secs| lookback_cutoff(Utc::now().timestamp(), secs));
        let signatures: Vec<String> = signatures
            .into_iter()
            .filter(|info| is_within_lookback(info, cutoff))
            .map(|info| info.signature)
            .collect();

        report.discovered = signatures.len();
        self.publish_progress(target, 0, report.discovered);
        tracing::info!(label = %target.label, total = report.discovered, "Scanning history");

        for batch in signatures.chunks(self.rpc.batch_size()) {
            tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => return (report, true),
                _ = self.rpc.throttle() => {},
            }

            match self.rpc.get_transaction_batch(batch).await {
                Ok(records) => {
                    for record in &records {
                        if let Some(event) = classify(target.kind, record) {
                            tracing::info!(
                                label = %target.label,
                                signature = %event.signature,
                                kind = %event.kind,
                                "[HISTORY] {}",
                                event.summary
                            );
                            self.store.upsert(event);
                            report.events += 1;
                        }
                    }
                    report.processed += batch.len();
                    self.publish_progress(target, report.processed, report.discovered);
                }
                Err(e) => {
                    tracing::error!(
                        label = %target.label,
                        processed = report.processed,
                        abandoned = report.discovered - report.processed,
                        "Transaction batch failed, abandoning target: {}",
                        e
                    );
                    report.error = Some(e.to_string());
                    break;
                }
            }
        }

        (report, false)
    }

    fn publish_progress(&self, target: &WatchTarget, current: usize, total: usize) {
        self.progress.send_replace(Some(ScanProgress {
            target: target.label.clone(),
            current,
            total,
        }));
    }
}

/// Oldest block time still inside a window of `secs` ending at `now`.
fn lookback_cutoff(now: i64, secs: u64) -> i64 {
    now.saturating_sub(i64::try_from(secs).unwrap_or(i64::MAX))
}

/// With a lookback window, only signatures with a known block time inside the
/// window are kept.
fn is_within_lookback(info: &SignatureInfo, cutoff: Option<i64>) -> bool {
    match cutoff {
        None => true,
        Some(cutoff) => info.block_time.is_some_and(|t| t > cutoff),
    }
}
