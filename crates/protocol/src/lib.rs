//! DeskPulse Protocol
//!
//! Shared types for the realtime change channels of the DeskPulse dashboard.
//! Frames are serialized as JSON over WebSocket; records are the row shapes
//! the REST list endpoints return.

use uuid::Uuid;

pub mod server;
pub mod types;

pub use server::{ChangeAction, ChangeKind, ChangePayload, ServerFrame};
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
