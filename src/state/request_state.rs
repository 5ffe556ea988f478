//! Request state machine and the published request snapshot
//!
//! Request states: RUNNING → {COMPLETED | ERROR | CANCELED}

use ats_protocol::{NewMultiCommandRequest, TestContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use super::{next_seq, now, CommandDetail, CommandState, TerminalState};

/// Schema version for request_detail.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "ats-session/request_detail@1";

/// File name of a persisted snapshot.
pub const SNAPSHOT_FILE_NAME: &str = "request_detail.json";

/// Separator between appended error messages.
pub const ERROR_MESSAGE_SEPARATOR: &str = "\n---\n";

/// Request state enumeration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    #[default]
    Running,
    Canceled,
    Completed,
    Error,
}

impl TerminalState for RequestState {
    fn is_terminal(&self) -> bool {
        !matches!(self, RequestState::Running)
    }
}

impl RequestState {
    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: RequestState) -> bool {
        matches!(
            (self, target),
            (
                RequestState::Running,
                RequestState::Canceled | RequestState::Completed | RequestState::Error
            )
        )
    }
}

/// Why a request or command was canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    ExternalCancelRequest,
    CommandNotAvailable,
    InvalidRequest,
    InvalidResource,
}

/// Why a request or command ended in ERROR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorReason {
    InvalidRequest,
    InvalidResource,
    ResultProcessingError,
    UnknownReason,
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::InvalidRequest => "INVALID_REQUEST",
            ErrorReason::InvalidResource => "INVALID_RESOURCE",
            ErrorReason::ResultProcessingError => "RESULT_PROCESSING_ERROR",
            ErrorReason::UnknownReason => "UNKNOWN_REASON",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CancelReason::ExternalCancelRequest => "EXTERNAL_CANCEL_REQUEST",
            CancelReason::CommandNotAvailable => "COMMAND_NOT_AVAILABLE",
            CancelReason::InvalidRequest => "INVALID_REQUEST",
            CancelReason::InvalidResource => "INVALID_RESOURCE",
        };
        f.write_str(s)
    }
}

/// Published state of a request (request_detail.json)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDetail {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// Request identifier (the session id)
    pub id: String,

    pub state: RequestState,

    /// The immutable input request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_request: Option<NewMultiCommandRequest>,

    /// Commands keyed by command id
    #[serde(default)]
    pub commands: BTreeMap<String, CommandDetail>,

    /// Retry contexts keyed by command id
    #[serde(default)]
    pub test_contexts: BTreeMap<String, TestContext>,

    /// Remaining automatic retries
    pub max_retry_on_test_failures: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<CancelReason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<ErrorReason>,

    /// Every error cause, oldest first, joined by [`ERROR_MESSAGE_SEPARATOR`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Session created to retry this request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_session_id: Option<String>,

    pub create_time: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    pub update_time: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    /// Monotonic sequence counter for ordering
    pub seq: u64,
}

/// Errors for request state operations
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidTransition { from: RequestState, to: RequestState },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RequestDetail {
    /// Create a new request in RUNNING state
    pub fn new(id: impl Into<String>) -> Self {
        let now = now();
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            id: id.into(),
            state: RequestState::Running,
            original_request: None,
            commands: BTreeMap::new(),
            test_contexts: BTreeMap::new(),
            max_retry_on_test_failures: 0,
            cancel_reason: None,
            error_reason: None,
            error_message: None,
            next_attempt_session_id: None,
            create_time: now,
            start_time: None,
            update_time: now,
            end_time: None,
            seq: next_seq(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: RequestState) -> Result<(), StateError> {
        if !self.state.can_transition_to(new_state) {
            return Err(StateError::InvalidTransition {
                from: self.state,
                to: new_state,
            });
        }

        self.state = new_state;
        self.touch();
        if new_state.is_terminal() {
            self.end_time = Some(self.update_time);
        }
        Ok(())
    }

    /// RUNNING → CANCELED
    pub fn cancel(&mut self, reason: CancelReason) -> Result<(), StateError> {
        self.transition(RequestState::Canceled)?;
        self.cancel_reason = Some(reason);
        Ok(())
    }

    /// RUNNING → ERROR, appending `message` to the error chain.
    pub fn fail(&mut self, reason: ErrorReason, message: &str) -> Result<(), StateError> {
        self.transition(RequestState::Error)?;
        self.error_reason = Some(reason);
        self.append_error_message(reason, message);
        Ok(())
    }

    /// RUNNING → COMPLETED
    pub fn complete(&mut self) -> Result<(), StateError> {
        self.transition(RequestState::Completed)
    }

    /// Append `<reason>: <message>` to the error chain without changing state.
    pub fn append_error_message(&mut self, reason: ErrorReason, message: &str) {
        let entry = format!("{}: {}", reason, message);
        self.error_message = Some(match self.error_message.take() {
            Some(existing) if !existing.is_empty() => {
                format!("{}{}{}", existing, ERROR_MESSAGE_SEPARATOR, entry)
            }
            _ => entry,
        });
        self.touch();
    }

    /// Individual causes in the error chain.
    pub fn error_chain(&self) -> Vec<&str> {
        self.error_message
            .as_deref()
            .map(|m| m.split(ERROR_MESSAGE_SEPARATOR).collect())
            .unwrap_or_default()
    }

    /// Bump the update time and sequence number.
    ///
    /// The sequence never goes below the current one, so a snapshot
    /// rehydrated from an earlier process keeps advancing.
    pub fn touch(&mut self) {
        self.update_time = now();
        self.seq = next_seq().max(self.seq.saturating_add(1));
    }

    /// Whether every command completed. A request without commands has not.
    pub fn all_commands_completed(&self) -> bool {
        !self.commands.is_empty()
            && self
                .commands
                .values()
                .all(|c| c.state == CommandState::Completed)
    }

    /// Ids of completed commands that reported failing tests.
    pub fn failing_command_ids(&self) -> Vec<String> {
        self.commands
            .values()
            .filter(|c| c.has_failed_tests())
            .map(|c| c.id.clone())
            .collect()
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write atomically to file (write-then-rename)
    pub fn write_to_file(&self, path: &Path) -> Result<(), StateError> {
        let json = self.to_json()?;

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Load from file
    pub fn from_file(path: &Path) -> Result<Self, StateError> {
        let json = fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }

    /// Write to `<dir>/<id>/request_detail.json`
    pub fn write_to_dir(&self, dir: &Path) -> Result<(), StateError> {
        let session_dir = dir.join(&self.id);
        fs::create_dir_all(&session_dir)?;
        self.write_to_file(&session_dir.join(SNAPSHOT_FILE_NAME))
    }
}
