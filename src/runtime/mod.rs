//! Session runtime boundary
//!
//! The runtime owns the session's jobs and delivers lifecycle events. It is
//! abstracted for testability:
//! - SessionRuntime: job submission, job queries, snapshot publication, test messages
//! - SessionCreator: starts a new session (the retry trigger)
//! - EventLoop: drains a session's events into its handler on one thread

mod event_loop;

pub use event_loop::{EventLoop, LoopReport, SessionEventHandler};

use ats_protocol::{CreateSessionRequest, SessionNotification, SessionRequest};

use crate::cancel::CancelSignal;
use crate::job::JobInfo;
use crate::state::RequestDetail;

/// Lifecycle events delivered to a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session is starting with the embedded request.
    SessionStarting { request: SessionRequest },
    /// A test of `job_id` started.
    TestStarting { job_id: String, test_id: String },
    /// A job finished; carries its final state.
    JobEnded { job: JobInfo },
    /// Every job has finished and the session is ending.
    SessionEnded,
    /// Out-of-band message.
    Notification(SessionNotification),
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::SessionStarting { .. } => "session_starting",
            SessionEvent::TestStarting { .. } => "test_starting",
            SessionEvent::JobEnded { .. } => "job_ended",
            SessionEvent::SessionEnded => "session_ended",
            SessionEvent::Notification(_) => "notification",
        }
    }
}

/// Runtime errors
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("job {0} rejected by the session")]
    JobRejected(String),

    #[error("test {0} not found")]
    TestNotFound(String),

    #[error("message delivery failed: {0}")]
    Delivery(String),

    #[error("session creation failed: {0}")]
    SessionCreation(String),

    #[error("failed to start event loop: {0}")]
    Spawn(#[from] std::io::Error),
}

/// The session hosting a coordinator.
pub trait SessionRuntime: Send + Sync {
    fn session_id(&self) -> String;

    /// Submit a job to the running session.
    fn add_job(&self, job: JobInfo) -> Result<(), RuntimeError>;

    /// Every job of the session with its current status.
    fn all_jobs(&self) -> Vec<JobInfo>;

    /// Replace the session's published output.
    fn publish_output(&self, detail: &RequestDetail);

    /// Last published output, used to resume after a restart.
    fn last_output(&self) -> Option<RequestDetail>;

    /// Send a message to a running test.
    fn send_to_test(&self, test_id: &str, signal: &CancelSignal) -> Result<(), RuntimeError>;
}

/// Creates new sessions.
pub trait SessionCreator: Send + Sync {
    /// Start a session and return its id.
    fn create_session(&self, request: CreateSessionRequest) -> Result<String, RuntimeError>;
}
