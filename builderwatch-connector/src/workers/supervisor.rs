use crate::{
    listener::{ConnectionState, LiveListener},
    workers::shutdown_requested,
};
use std::sync::Arc;
use tokio::{
    sync::watch,
    time::{sleep, Duration},
};

/// Watches the listener's connection state and resubscribes with exponential
/// backoff whenever the feed is `Degraded` or `Failed`. Only the targets that
/// failed or lost their stream are re-established.
///
/// The delay starts at `initial`, doubles after every attempt that does not
/// bring the feed back, is capped at `max`, and resets once a notification is
/// received again.
pub struct ReconnectSupervisor {
    listener: Arc<LiveListener>,
    initial: Duration,
    max: Duration,
}

impl ReconnectSupervisor {
    pub fn new(listener: Arc<LiveListener>, initial: Duration, max: Duration) -> Self {
        Self {
            listener,
            initial,
            max: max.max(initial),
        }
    }

    /// Runs until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut state_rx = self.listener.watch_state();
        let mut delay = self.initial;

        loop {
            let state = *state_rx.borrow_and_update();
            match state {
                ConnectionState::Degraded | ConnectionState::Failed => {
                    tracing::warn!(
                        "Live feed is {}, resubscribing in {} ms",
                        state,
                        delay.as_millis()
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut shutdown) => break,
                        _ = sleep(delay) => {},
                    }
                    // Not raced against shutdown: an interrupted resubscribe
                    // would leave spawned subscription tasks untracked. Setup
                    // is bounded by the listener's subscribe timeout.
                    let active = self.listener.resubscribe().await;
                    tracing::info!(active, "Resubscribe attempt finished");
                    delay = (delay * 2).min(self.max);
                    continue;
                }
                ConnectionState::Live => delay = self.initial,
                ConnectionState::Connecting => {}
            }

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Reconnect supervisor has shut down.");
    }
}
