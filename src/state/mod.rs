//! Request and command state machines
//!
//! - Request states: RUNNING → {COMPLETED | ERROR | CANCELED}
//! - Command states: UNKNOWN/QUEUED/RUNNING → {COMPLETED | ERROR | CANCELED}
//!
//! Terminal states are sticky: a request or command reaches one exactly once.

mod command_state;
mod request_state;

pub use command_state::{CommandAttempt, CommandDetail, CommandState};
pub use request_state::{
    CancelReason, ErrorReason, RequestDetail, RequestState, StateError, ERROR_MESSAGE_SEPARATOR,
    SCHEMA_ID, SCHEMA_VERSION, SNAPSHOT_FILE_NAME,
};

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global sequence counter for ordering snapshots within a single process
static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Get the next sequence number for ordering
pub fn next_seq() -> u64 {
    SEQUENCE_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Check if a state is terminal (no further transitions possible)
pub trait TerminalState {
    fn is_terminal(&self) -> bool;
}
