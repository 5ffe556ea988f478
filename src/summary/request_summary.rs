//! Aggregated request summary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::outcome::{CommandVerdict, ExitCode};
use crate::state::{CancelReason, CommandState, ErrorReason, RequestDetail, RequestState};

/// Schema version of a serialized summary
pub const REQUEST_SUMMARY_SCHEMA_VERSION: u32 = 1;

/// Schema identifier of a serialized summary
pub const REQUEST_SUMMARY_SCHEMA_ID: &str = "ats-session/request_summary@1";

/// One command in a summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSummary {
    pub id: String,
    pub command_line: String,
    pub state: CommandState,
    pub verdict: CommandVerdict,
    pub passed_test_count: u64,
    pub failed_test_count: u64,
    pub total_test_count: u64,
    pub done_module_count: u64,
    pub total_module_count: u64,
    pub attempt_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<ErrorReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Aggregated view of a request snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSummary {
    pub schema_version: u32,
    pub schema_id: String,
    pub request_id: String,
    pub created_at: DateTime<Utc>,
    pub state: RequestState,
    pub exit_code: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<CancelReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<ErrorReason>,

    /// Commands in id order
    pub commands: Vec<CommandSummary>,

    pub commands_passed: usize,
    pub commands_tests_failed: usize,
    pub commands_error: usize,
    pub commands_canceled: usize,
    pub commands_pending: usize,

    pub passed_test_count: u64,
    pub failed_test_count: u64,
    pub total_test_count: u64,

    /// Error causes, oldest first
    pub error_chain: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_session_id: Option<String>,

    /// Start to end, when both are known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    pub human_summary: String,
}

impl RequestSummary {
    pub fn from_detail(detail: &RequestDetail) -> Self {
        let commands: Vec<CommandSummary> = detail
            .commands
            .values()
            .map(|c| CommandSummary {
                id: c.id.clone(),
                command_line: c.command_line.clone(),
                state: c.state,
                verdict: CommandVerdict::of(c),
                passed_test_count: c.passed_test_count,
                failed_test_count: c.failed_test_count,
                total_test_count: c.total_test_count,
                done_module_count: c.done_module_count,
                total_module_count: c.total_module_count,
                attempt_count: c.attempts.len(),
                error_reason: c.error_reason,
                error_message: c.error_message.clone(),
            })
            .collect();

        let verdicts: Vec<CommandVerdict> = commands.iter().map(|c| c.verdict).collect();
        let count = |v: CommandVerdict| verdicts.iter().filter(|x| **x == v).count();

        let duration_ms = detail
            .start_time
            .zip(detail.end_time)
            .and_then(|(start, end)| u64::try_from((end - start).num_milliseconds()).ok());

        let mut summary = Self {
            schema_version: REQUEST_SUMMARY_SCHEMA_VERSION,
            schema_id: REQUEST_SUMMARY_SCHEMA_ID.to_string(),
            request_id: detail.id.clone(),
            created_at: Utc::now(),
            state: detail.state,
            exit_code: ExitCode::for_request(detail.state, &verdicts).as_i32(),
            cancel_reason: detail.cancel_reason,
            error_reason: detail.error_reason,
            commands_passed: count(CommandVerdict::Passed),
            commands_tests_failed: count(CommandVerdict::TestsFailed),
            commands_error: count(CommandVerdict::Error),
            commands_canceled: count(CommandVerdict::Canceled),
            commands_pending: count(CommandVerdict::Pending),
            passed_test_count: commands.iter().map(|c| c.passed_test_count).sum(),
            failed_test_count: commands.iter().map(|c| c.failed_test_count).sum(),
            total_test_count: commands.iter().map(|c| c.total_test_count).sum(),
            error_chain: detail.error_chain().into_iter().map(str::to_string).collect(),
            next_attempt_session_id: detail.next_attempt_session_id.clone(),
            duration_ms,
            commands,
            human_summary: String::new(),
        };
        summary.human_summary = summary.headline();
        summary
    }

    fn headline(&self) -> String {
        let total = self.commands.len();
        match self.state {
            RequestState::Running => format!(
                "Request running: {}/{} commands finished",
                total - self.commands_pending,
                total
            ),
            RequestState::Completed if self.commands_tests_failed > 0 => format!(
                "Request completed: {} of {} tests failed in {} command(s)",
                self.failed_test_count, self.total_test_count, self.commands_tests_failed
            ),
            RequestState::Completed => format!(
                "Request completed: {} tests passed in {} command(s)",
                self.passed_test_count, total
            ),
            RequestState::Canceled => format!(
                "Request canceled: {} command(s) canceled",
                self.commands_canceled
            ),
            RequestState::Error => match self.error_reason {
                Some(reason) => format!("Request failed ({}): {} command(s) in error", reason, self.commands_error),
                None => format!("Request failed: {} command(s) in error", self.commands_error),
            },
        }
    }

    /// Multi-line report for terminals.
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("Request {}: {:?}", self.request_id, self.state),
            self.human_summary.clone(),
        ];
        for command in &self.commands {
            lines.push(format!(
                "  [{}] {} ({}): {}/{} passed, {} failed, {} attempt(s)",
                command.verdict.as_str(),
                command.command_line,
                command.id,
                command.passed_test_count,
                command.total_test_count,
                command.failed_test_count,
                command.attempt_count
            ));
            if let Some(message) = &command.error_message {
                lines.push(format!("      {}", message));
            }
        }
        if !self.error_chain.is_empty() {
            lines.push("Errors:".to_string());
            lines.extend(self.error_chain.iter().map(|e| format!("  - {}", e)));
        }
        if let Some(next) = &self.next_attempt_session_id {
            lines.push(format!("Next attempt: {}", next));
        }
        lines.join("\n")
    }

    pub fn exit_code_enum(&self) -> Option<ExitCode> {
        ExitCode::from_i32(self.exit_code)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CommandDetail;

    fn command(id: &str, passed: u64, failed: u64) -> CommandDetail {
        let mut command = CommandDetail::new(id, format!("cts -m {}", id));
        command.passed_test_count = passed;
        command.failed_test_count = failed;
        command.total_test_count = passed + failed;
        command.finish(CommandState::Completed);
        command
    }

    #[test]
    fn test_completed_with_failures() {
        let mut detail = RequestDetail::new("s1");
        detail.commands.insert("a".into(), command("a", 10, 0));
        detail.commands.insert("b".into(), command("b", 5, 3));
        detail.complete().unwrap();
        detail.next_attempt_session_id = Some("s2".to_string());

        let summary = RequestSummary::from_detail(&detail);

        assert_eq!(summary.commands_passed, 1);
        assert_eq!(summary.commands_tests_failed, 1);
        assert_eq!(summary.failed_test_count, 3);
        assert_eq!(summary.total_test_count, 18);
        assert_eq!(summary.exit_code_enum(), Some(ExitCode::TestsFailed));
        assert_eq!(
            summary.human_summary,
            "Request completed: 3 of 18 tests failed in 1 command(s)"
        );
        assert!(summary.render().contains("Next attempt: s2"));
    }

    #[test]
    fn test_error_chain_rendered() {
        let mut detail = RequestDetail::new("s1");
        detail.fail(ErrorReason::InvalidRequest, "bad line").unwrap();
        detail.append_error_message(ErrorReason::ResultProcessingError, "no output");

        let summary = RequestSummary::from_detail(&detail);

        assert_eq!(summary.exit_code, 2);
        assert_eq!(
            summary.error_chain,
            vec!["INVALID_REQUEST: bad line", "RESULT_PROCESSING_ERROR: no output"]
        );
        let rendered = summary.render();
        assert!(rendered.contains("Errors:"));
        assert!(rendered.contains("  - RESULT_PROCESSING_ERROR: no output"));
        assert!(summary.human_summary.starts_with("Request failed (INVALID_REQUEST)"));
    }

    #[test]
    fn test_running_request() {
        let mut detail = RequestDetail::new("s1");
        detail.commands.insert("a".into(), command("a", 1, 0));
        detail
            .commands
            .insert("b".into(), CommandDetail::new("b", "cts -m b"));

        let summary = RequestSummary::from_detail(&detail);
        assert_eq!(summary.human_summary, "Request running: 1/2 commands finished");
        assert!(summary.duration_ms.is_none());
    }
}
