//! DeskPulse realtime client
//!
//! Keeps dashboard lists live: one WebSocket per channel group, a router
//! that parses each frame once, a registry of subscribers sharing the
//! socket, and per-domain adapters that hydrate thin push payloads from the
//! REST list endpoints before handing render-ready records to consumers.

pub mod adapter;
pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod local;
pub mod reconcile;
pub mod record;
pub mod registry;
pub mod router;
pub mod source;

#[cfg(test)]
mod testing;

pub use adapter::{LogNotifier, Notifier, SubscribeOptions};
pub use config::{RealtimeConfig, ScopeKind};
pub use connection::{ConnectionHandle, ConnectionManager, ConnectionState};
pub use error::RealtimeError;
pub use hub::{RealtimeHub, RealtimeSubscription};
pub use local::{ApplyOutcome, LocalCollection};
pub use reconcile::{Delivery, Updated};
pub use record::DomainRecord;
pub use source::{RecordSource, RestSource};
