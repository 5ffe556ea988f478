//! Automatic retry of failing commands
//!
//! A finished request whose completed commands reported failing tests is
//! retried while its retry budget lasts. The retry is one new session
//! running the original commands again, linked back to this one. Each
//! command resumes from its own output location under the previous session.

use ats_protocol::{CreateSessionRequest, NewMultiCommandRequest, SessionRequest, TestContext};

use super::{RequestCoordinator, SessionState};
use crate::job::{canonical_command_line, command_id};
use crate::state::{RequestDetail, RequestState};

/// Plugin handling retry sessions.
pub const RETRY_PLUGIN_LABEL: &str = "ats-session";

/// Whether `detail` should be retried.
///
/// Requires remaining budget, no retry created yet, a request that was not
/// canceled and at least one completed command with failing tests.
pub fn is_retry_eligible(detail: &RequestDetail) -> bool {
    detail.max_retry_on_test_failures > 0
        && detail.next_attempt_session_id.is_none()
        && detail.state != RequestState::Canceled
        && !detail.failing_command_ids().is_empty()
}

/// The session request retrying `request` after session `session_id`.
///
/// Every command is carried over. A single-command request also carries the
/// context to resume from: the retained one, or the original command line.
pub fn retry_request(
    session_id: &str,
    detail: &RequestDetail,
    request: &NewMultiCommandRequest,
) -> CreateSessionRequest {
    let prev_test_context = match request.commands.as_slice() {
        [info] => {
            let id = command_id(request, info);
            Some(
                detail
                    .test_contexts
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| TestContext {
                        command_line: canonical_command_line(request, info).to_string(),
                        env_vars: request.test_environment.env_vars.clone(),
                        test_resources: Vec::new(),
                    }),
            )
        }
        _ => None,
    };

    let retry = NewMultiCommandRequest {
        max_retry_on_test_failures: detail.max_retry_on_test_failures.saturating_sub(1),
        retry_previous_session_id: Some(session_id.to_string()),
        prev_test_run_id: None,
        prev_test_context,
        ..request.clone()
    };
    CreateSessionRequest {
        session_name: format!("{}_retry", session_id),
        plugin_label: RETRY_PLUGIN_LABEL.to_string(),
        request: SessionRequest::new_multi_command(retry),
    }
}

impl RequestCoordinator {
    /// Create the retry session and record it as the next attempt.
    pub(super) fn trigger_retry(&self, state: &mut SessionState, request: &NewMultiCommandRequest) {
        let create = retry_request(&self.session_id, &state.detail, request);
        match self.session_creator.create_session(create) {
            Ok(next) => {
                tracing::info!(
                    next_session_id = %next,
                    failing = state.detail.failing_command_ids().len(),
                    "created retry session"
                );
                state.detail.next_attempt_session_id = Some(next);
                self.publish(state);
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to create retry session");
            }
        }
    }
}
