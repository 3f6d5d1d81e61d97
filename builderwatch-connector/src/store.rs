//! # Event Store
//!
//! The merge point of the backfill and live producers and the single source of
//! truth for consumers. Events are keyed by transaction signature; an upsert
//! either inserts a new entry or replaces the existing one in place.
//!
//! ## Scaling
//!
//! `upsert` is O(1). `snapshot` copies and sorts the whole feed, O(n log n) per
//! call. The feed is never evicted, so this is sized for sessions that collect
//! up to a few tens of thousands of events.

use crate::events::{Event, EventKind};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};
use tokio::sync::watch;

/// What an `upsert` did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// The signature was already present with a different classification.
    /// The new event still replaced the old one.
    Conflict { previous: EventKind },
}

/// Two classifications of the same signature that disagreed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anomaly {
    pub signature: String,
    pub previous: Event,
    pub current: Event,
}

#[derive(Debug)]
struct Entry {
    event: Event,
    /// Position of the first insertion of this signature. Breaks timestamp ties.
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_seq: u64,
    anomalies: Vec<Anomaly>,
}

/// A thread-safe, in-memory, signature-keyed event set.
#[derive(Debug)]
pub struct EventStore {
    inner: Mutex<Inner>,
    revision: watch::Sender<u64>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Mutex::new(Inner::default()),
            revision,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic inside the critical section cannot leave the map half-written,
        // so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts `event`, or replaces the entry with the same signature.
    ///
    /// A replacement whose kind or summary differs from the stored one is
    /// recorded as an anomaly and reported as [`UpsertOutcome::Conflict`].
    pub fn upsert(&self, event: Event) -> UpsertOutcome {
        let outcome = {
            let mut inner = self.lock();
            let inner = &mut *inner;
            match inner.entries.get_mut(&event.signature) {
                Some(entry) => {
                    let previous = std::mem::replace(&mut entry.event, event.clone());
                    if previous.kind != event.kind || previous.summary != event.summary {
                        tracing::error!(
                            signature = %event.signature,
                            previous = %previous.kind,
                            current = %event.kind,
                            "Classification mismatch for an already stored signature"
                        );
                        let previous_kind = previous.kind;
                        inner.anomalies.push(Anomaly {
                            signature: event.signature.clone(),
                            previous,
                            current: event,
                        });
                        UpsertOutcome::Conflict {
                            previous: previous_kind,
                        }
                    } else {
                        UpsertOutcome::Replaced
                    }
                }
                None => {
                    let seq = inner.next_seq;
                    inner.next_seq += 1;
                    inner
                        .entries
                        .insert(event.signature.clone(), Entry { event, seq });
                    UpsertOutcome::Inserted
                }
            }
        };
        self.revision.send_modify(|rev| *rev += 1);
        outcome
    }

    /// Returns every event, newest first. Equal timestamps keep insertion order.
    pub fn snapshot(&self) -> Vec<Event> {
        let inner = self.lock();
        let mut entries: Vec<&Entry> = inner.entries.values().collect();
        entries.sort_by(|a, b| {
            b.event
                .timestamp
                .cmp(&a.event.timestamp)
                .then(a.seq.cmp(&b.seq))
        });
        entries.into_iter().map(|e| e.event.clone()).collect()
    }

    pub fn get(&self, signature: &str) -> Option<Event> {
        self.lock().entries.get(signature).map(|e| e.event.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Classification mismatches observed so far.
    pub fn anomalies(&self) -> Vec<Anomaly> {
        self.lock().anomalies.clone()
    }

    /// Subscribes to change notifications. The value is a revision counter
    /// bumped after every upsert.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }
}
