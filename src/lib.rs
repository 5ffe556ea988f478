//! ATS session orchestration
//!
//! This crate implements the session coordinator of a test-execution control
//! plane: given a multi-command xTS request it creates, sequences, monitors,
//! retries and aggregates the jobs of one session, and publishes a resumable
//! view of request and command progress after every event.

pub mod cancel;
pub mod config;
pub mod coordinator;
pub mod exec;
pub mod job;
pub mod mock;
pub mod orchestrator;
pub mod runtime;
pub mod state;
pub mod summary;

pub use coordinator::{RequestCoordinator, SessionServices};
pub use orchestrator::{JobCreator, JobOrchestrator, OrchestratorError, ResultProcessor};
pub use runtime::{EventLoop, SessionCreator, SessionEvent, SessionRuntime};
pub use state::{CommandState, RequestDetail, RequestState};
