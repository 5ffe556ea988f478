//! In-process doubles for the session boundary
//!
//! Configurable stand-ins for every seam of the coordinator, used by unit
//! and integration tests:
//!
//! - `MockRuntime`: job store, snapshot sink and test message recorder
//! - `MockSessionCreator`: records retry sessions
//! - `MockJobCreator`: per-command-line job creation behavior
//! - `MockResultProcessor`: sums test counters from job properties
//! - `MockCommandRunner`: records mount tool invocations
//!
//! Failure injection is keyed by the natural identifier of each call
//! (command line, command id, test id or program name).

mod collaborators;
mod runner;
mod runtime;

pub use collaborators::{MockJobCreator, MockResultProcessor, MOCK_ARTIFACT_NAME};
pub use runner::MockCommandRunner;
pub use runtime::{MockRuntime, MockSessionCreator};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mock's state, ignoring poisoning from a panicked test thread.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
