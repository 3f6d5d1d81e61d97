//! A chain event reconciliation engine for Solana.
//!
//! This crate watches a set of on-chain addresses for program deployments, program
//! upgrades and multisig creations, and maintains a single deduplicated, time-ordered
//! feed built from a bounded historical backfill and a live log subscription.
//!
//! # Key Components
//!
//! *   [`workers::EventManager`]: The main entry point. It runs the backfill scanner,
//!     the live listener and the reconnect supervisor, and hands out an
//!     [`workers::EventManagerHandle`] for consumers.
//! *   [`store::EventStore`]: The signature-keyed merge point of both producers.
//! *   [`classifier`]: The table-driven log classifier.
//! *   [`rpc`] and [`pubsub`]: The transport seams, with Solana implementations.
pub mod classifier;
/// Defines configuration structures for the connector.
pub mod config;
/// The connector's error taxonomy.
pub mod error;
/// The feed's data model.
pub mod events;
/// The live log listener and its connection state.
pub mod listener;
pub mod pubsub;
pub mod rpc;
pub mod store;
/// The background workers and the `EventManager` that owns them.
pub mod workers;

pub use events::{Event, EventKind, EventSource, WatchKind, WatchTarget};
pub use listener::{ConnectionState, TargetStatus};
pub use store::{EventStore, UpsertOutcome};
pub use workers::{EventManager, EventManagerHandle};
