//! External collaborators of the job orchestrator
//!
//! Job creation and result parsing are deterministic transformations owned
//! by other components; the orchestrator only sees these traits.

use std::path::{Path, PathBuf};

use crate::job::JobInfo;
use crate::state::ErrorReason;

use super::request_info::SessionRequestInfo;

/// Why a job could not be created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobCreationError {
    /// No job is needed for the command; not an error.
    #[error("skipped: {0}")]
    Skippable(String),

    /// A test resource could not be used (mount or archive failure).
    #[error("invalid resource: {0}")]
    InvalidResource(String),

    /// The command itself is unusable.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl JobCreationError {
    pub fn is_skippable(&self) -> bool {
        matches!(self, JobCreationError::Skippable(_))
    }

    /// Request-level reason of a non-skippable failure.
    pub fn reason(&self) -> Option<ErrorReason> {
        match self {
            JobCreationError::Skippable(_) => None,
            JobCreationError::InvalidResource(_) => Some(ErrorReason::InvalidResource),
            JobCreationError::InvalidRequest(_) => Some(ErrorReason::InvalidRequest),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            JobCreationError::Skippable(m)
            | JobCreationError::InvalidResource(m)
            | JobCreationError::InvalidRequest(m) => m,
        }
    }
}

/// Turns a validated command into jobs.
pub trait JobCreator: Send + Sync {
    /// The serial job of a command. `Ok(None)` means no job is needed.
    fn create_primary_job(
        &self,
        info: &SessionRequestInfo,
    ) -> Result<Option<JobInfo>, JobCreationError>;

    /// Fan-out jobs of a command. An empty list means no job is needed.
    fn create_secondary_jobs(
        &self,
        info: &SessionRequestInfo,
    ) -> Result<Vec<JobInfo>, JobCreationError>;
}

/// Aggregated result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSummary {
    pub passed_test_count: u64,
    pub failed_test_count: u64,
    pub total_test_count: u64,
    pub done_module_count: u64,
    pub total_module_count: u64,
    /// Retainable result artifact, enabling a retry to resume from it
    pub result_artifact: Option<PathBuf>,
}

/// Inputs to result processing for one command.
#[derive(Debug)]
pub struct ResultContext<'a> {
    pub session_id: &'a str,
    pub command_id: &'a str,
    /// Jobs owned by the command
    pub jobs: &'a [JobInfo],
    /// Fresh directory receiving results
    pub result_dir: &'a Path,
    /// Fresh directory receiving logs
    pub logs_dir: &'a Path,
    /// Validated parameters, when the command went through validation
    pub request_info: Option<&'a SessionRequestInfo>,
}

/// Result processing errors
#[derive(Debug, thiserror::Error)]
pub enum ResultProcessingError {
    #[error("unsupported output url: {0:?}")]
    UnsupportedOutputUrl(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse results of command {command_id}: {message}")]
    Parse { command_id: String, message: String },
}

impl ResultProcessingError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        ResultProcessingError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Parses the results of a command's jobs.
pub trait ResultProcessor: Send + Sync {
    /// `Ok(None)` means the jobs left no usable result.
    fn process(
        &self,
        context: &ResultContext<'_>,
    ) -> Result<Option<ResultSummary>, ResultProcessingError>;
}
