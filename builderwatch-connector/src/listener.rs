//! # Live Stream Listener
//!
//! Subscribes once per watched address and feeds classified notifications into
//! the [`EventStore`]. Every target carries its own subscription status; the
//! process-wide [`ConnectionState`] is derived from all of them.
//!
//! Reconnection policy lives elsewhere (see `workers::supervisor`). This type
//! only exposes [`LiveListener::resubscribe`], which re-establishes the targets
//! that failed or lost their stream and leaves healthy ones alone, and an
//! idempotent [`LiveListener::unsubscribe`].

use crate::{
    classifier::classify,
    events::{LogNotification, WatchTarget},
    pubsub::LogSubscriber,
    store::EventStore,
};
use futures::future;
use solana_sdk::commitment_config::CommitmentLevel;
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{timeout, Duration},
};

/// Health of the live subscriptions, as shown to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Subscriptions are being set up, or no notification has arrived yet.
    Connecting,
    /// Every target is subscribed and notifications are arriving.
    Live,
    /// Some targets failed or lost their stream while others are still up.
    Degraded,
    /// No subscription could be established. The feed is backfill-only.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Live => "live",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Subscription status of a single target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    /// Not subscribed, either never or since the last `unsubscribe`.
    Idle,
    /// Subscribed, nothing received yet.
    Subscribed,
    /// Subscribed and at least one notification received.
    Receiving,
    /// The last setup attempt failed.
    Failed,
    /// The upstream stream ended.
    Closed,
}

impl TargetStatus {
    fn is_active(self) -> bool {
        matches!(self, TargetStatus::Subscribed | TargetStatus::Receiving)
    }

    fn needs_subscription(self) -> bool {
        matches!(
            self,
            TargetStatus::Idle | TargetStatus::Failed | TargetStatus::Closed
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    status: TargetStatus,
    /// Bumped whenever the target is (re)subscribed or unsubscribed. Drain tasks
    /// of an older generation must not touch `status`.
    generation: u64,
}

/// Folds per-target statuses into the process-wide state.
fn aggregate(slots: &[Slot]) -> ConnectionState {
    let active = slots.iter().filter(|s| s.status.is_active()).count();
    let closed = slots.iter().any(|s| s.status == TargetStatus::Closed);
    let failed = slots.iter().any(|s| s.status == TargetStatus::Failed);
    let receiving = slots.iter().any(|s| s.status == TargetStatus::Receiving);

    if active == 0 {
        if closed {
            ConnectionState::Degraded
        } else if failed {
            ConnectionState::Failed
        } else {
            ConnectionState::Connecting
        }
    } else if closed || failed {
        ConnectionState::Degraded
    } else if receiving {
        ConnectionState::Live
    } else {
        ConnectionState::Connecting
    }
}

struct Shared {
    store: Arc<EventStore>,
    state: watch::Sender<ConnectionState>,
    slots: Mutex<Vec<Slot>>,
}

impl Shared {
    fn lock_slots(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, slots: &[Slot]) {
        let next = aggregate(slots);
        self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }

    /// Starts a new generation for `index` and returns it.
    fn begin(&self, index: usize) -> u64 {
        let mut slots = self.lock_slots();
        slots[index].generation += 1;
        slots[index].generation
    }

    /// Sets the status of `index` if `generation` is still current.
    fn set_status(&self, index: usize, generation: u64, status: TargetStatus) -> bool {
        let mut slots = self.lock_slots();
        if slots[index].generation != generation {
            return false;
        }
        slots[index].status = status;
        self.publish(&slots);
        true
    }

    fn handle_notification(
        &self,
        target: &WatchTarget,
        index: usize,
        generation: u64,
        notification: LogNotification,
    ) {
        let record = notification.into_record();
        if let Some(event) = classify(target.kind, &record) {
            tracing::info!(
                label = %target.label,
                signature = %event.signature,
                kind = %event.kind,
                "[LIVE] {}",
                event.summary
            );
            self.store.upsert(event);
        }

        let mut slots = self.lock_slots();
        let slot = &mut slots[index];
        if slot.generation == generation && slot.status == TargetStatus::Subscribed {
            slot.status = TargetStatus::Receiving;
            self.publish(&slots);
        }
    }
}

struct Subscription {
    index: usize,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stops the drain task after it has delivered everything already queued.
    async fn close(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            tracing::error!("Live drain task panicked: {}", e);
        }
    }
}

/// Owns the per-address log subscriptions.
pub struct LiveListener {
    targets: Vec<WatchTarget>,
    subscriber: Arc<dyn LogSubscriber>,
    commitment: CommitmentLevel,
    setup_timeout: Duration,
    shared: Arc<Shared>,
    subscriptions: Mutex<Vec<Subscription>>,
    /// Serialises subscribe/unsubscribe so two resubscribes cannot interleave.
    op_lock: tokio::sync::Mutex<()>,
}

impl LiveListener {
    pub fn new(
        targets: Vec<WatchTarget>,
        subscriber: Arc<dyn LogSubscriber>,
        commitment: CommitmentLevel,
        setup_timeout: Duration,
        store: Arc<EventStore>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let slots = vec![
            Slot {
                status: TargetStatus::Idle,
                generation: 0,
            };
            targets.len()
        ];
        Self {
            targets,
            subscriber,
            commitment,
            setup_timeout,
            shared: Arc::new(Shared {
                store,
                state,
                slots: Mutex::new(slots),
            }),
            subscriptions: Mutex::new(Vec::new()),
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Per-target statuses, in target order.
    pub fn target_statuses(&self) -> Vec<(WatchTarget, TargetStatus)> {
        let slots = self.shared.lock_slots();
        self.targets
            .iter()
            .cloned()
            .zip(slots.iter().map(|s| s.status))
            .collect()
    }

    /// Subscribes every target that has no active subscription and returns the
    /// number of active subscriptions afterwards.
    ///
    /// Setup failures never propagate: they are logged and reflected in the
    /// connection state (`Failed` if nothing is subscribed, `Degraded` if some
    /// targets are).
    pub async fn subscribe_all(&self) -> usize {
        let _guard = self.op_lock.lock().await;
        self.subscribe_missing().await
    }

    /// Re-establishes the targets that failed or whose stream ended. Healthy
    /// subscriptions are kept. Returns the number of active subscriptions.
    pub async fn resubscribe(&self) -> usize {
        let _guard = self.op_lock.lock().await;
        self.subscribe_missing().await
    }

    /// Cancels every subscription. Notifications already accepted are still
    /// delivered to the store. Calling it again is a no-op.
    pub async fn unsubscribe(&self) {
        let _guard = self.op_lock.lock().await;
        let subscriptions = std::mem::take(&mut *self.lock_subscriptions());
        {
            let mut slots = self.shared.lock_slots();
            for slot in slots.iter_mut() {
                slot.generation += 1;
                slot.status = TargetStatus::Idle;
            }
        }
        if subscriptions.is_empty() {
            return;
        }
        for subscription in subscriptions {
            subscription.close().await;
        }
        tracing::info!("Live subscriptions cancelled");
    }

    async fn subscribe_missing(&self) -> usize {
        let pending: Vec<(usize, u64)> = {
            let statuses: Vec<TargetStatus> =
                self.shared.lock_slots().iter().map(|s| s.status).collect();
            statuses
                .iter()
                .enumerate()
                .filter(|(_, status)| status.needs_subscription())
                .map(|(index, _)| (index, self.shared.begin(index)))
                .collect()
        };

        // Retire the finished drain tasks of closed targets.
        let stale: Vec<Subscription> = {
            let mut subscriptions = self.lock_subscriptions();
            let (stale, keep) = std::mem::take(&mut *subscriptions)
                .into_iter()
                .partition(|s| pending.iter().any(|(index, _)| *index == s.index));
            *subscriptions = keep;
            stale
        };
        for subscription in stale {
            subscription.close().await;
        }

        let attempts = pending.iter().map(|&(index, _)| {
            let target = &self.targets[index];
            async move {
                match timeout(
                    self.setup_timeout,
                    self.subscriber.subscribe(target.address, self.commitment),
                )
                .await
                {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(_) => Err(format!(
                        "setup timed out after {} ms",
                        self.setup_timeout.as_millis()
                    )),
                }
            }
        });
        let results = future::join_all(attempts).await;

        let mut opened = Vec::new();
        for (&(index, generation), result) in pending.iter().zip(results) {
            let target = &self.targets[index];
            match result {
                Ok(rx) => {
                    tracing::info!(label = %target.label, address = %target.address, "Subscribed to logs");
                    self.shared
                        .set_status(index, generation, TargetStatus::Subscribed);
                    let (stop, stop_rx) = oneshot::channel();
                    let task = tokio::spawn(drain(
                        self.shared.clone(),
                        target.clone(),
                        index,
                        generation,
                        rx,
                        stop_rx,
                    ));
                    opened.push(Subscription { index, stop, task });
                }
                Err(e) => {
                    tracing::error!(label = %target.label, "Live subscription failed: {}", e);
                    self.shared.set_status(index, generation, TargetStatus::Failed);
                }
            }
        }
        self.lock_subscriptions().extend(opened);

        let slots = self.shared.lock_slots();
        // Covers the no-op case, where no status changed.
        self.shared.publish(&slots);
        let active = slots.iter().filter(|s| s.status.is_active()).count();
        if active == 0 {
            tracing::warn!("No live subscription is active; feed is backfill-only");
        }
        active
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn drain(
    shared: Arc<Shared>,
    target: WatchTarget,
    index: usize,
    generation: u64,
    mut rx: mpsc::Receiver<LogNotification>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(notification) => {
                    shared.handle_notification(&target, index, generation, notification);
                }
                None => {
                    if shared.set_status(index, generation, TargetStatus::Closed) {
                        tracing::warn!(label = %target.label, "Live stream closed");
                    }
                    return;
                }
            },
            _ = &mut stop => break,
        }
    }

    rx.close();
    while let Some(notification) = rx.recv().await {
        shared.handle_notification(&target, index, generation, notification);
    }
}
