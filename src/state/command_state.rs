//! Command state machine and attempt records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{now, CancelReason, ErrorReason, TerminalState};
use crate::job::{
    JobInfo, JobStatus, TestInfo, TestResult, MOBLY_TESTS_FAILED_AND_ERROR, MOBLY_TESTS_PASSED,
    TRADEFED_TESTS_FAILED, TRADEFED_TESTS_PASSED,
};

/// Command state enumeration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandState {
    #[default]
    Unknown,
    Running,
    Completed,
    Error,
    Canceled,
    Queued,
}

impl TerminalState for CommandState {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandState::Completed | CommandState::Error | CommandState::Canceled
        )
    }
}

impl CommandState {
    /// Map a scheduler status and result onto a command state.
    pub fn from_status_and_result(status: JobStatus, result: TestResult) -> Self {
        match status {
            JobStatus::New => CommandState::Unknown,
            JobStatus::Assigned => CommandState::Queued,
            JobStatus::Running => CommandState::Running,
            JobStatus::Done if result == TestResult::Pass => CommandState::Completed,
            JobStatus::Done => CommandState::Error,
            JobStatus::Suspended => CommandState::Canceled,
        }
    }
}

/// One executed test of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAttempt {
    /// Test id.
    pub id: String,
    pub job_id: String,
    pub request_id: String,
    pub command_id: String,
    pub state: CommandState,
    #[serde(default)]
    pub device_serials: Vec<String>,
    pub passed_test_count: u64,
    pub failed_test_count: u64,
    pub total_test_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

impl CommandAttempt {
    /// Build the attempt record for one test of a finished job.
    ///
    /// Secondary-job counters take precedence over primary-job counters
    /// when a test reports both.
    pub fn from_test(request_id: &str, command_id: &str, job: &JobInfo, test: &TestInfo) -> Self {
        let passed = test
            .count_property(MOBLY_TESTS_PASSED)
            .or_else(|| test.count_property(TRADEFED_TESTS_PASSED))
            .unwrap_or(0);
        let failed = test
            .count_property(MOBLY_TESTS_FAILED_AND_ERROR)
            .or_else(|| test.count_property(TRADEFED_TESTS_FAILED))
            .unwrap_or(0);

        Self {
            id: test.id.clone(),
            job_id: job.id.clone(),
            request_id: request_id.to_string(),
            command_id: command_id.to_string(),
            state: CommandState::from_status_and_result(test.status, test.result),
            device_serials: job.device_serials(),
            passed_test_count: passed,
            failed_test_count: failed,
            total_test_count: passed + failed,
            create_time: test.timing.create_time,
            start_time: test.timing.start_time,
            end_time: test.timing.end_time,
            update_time: test.timing.modify_time,
        }
    }

    /// Build attempt records for every test of a finished job.
    ///
    /// A job that never created a test still yields one attempt carrying the
    /// job's own status.
    pub fn from_job(request_id: &str, command_id: &str, job: &JobInfo) -> Vec<Self> {
        if job.tests.is_empty() {
            let placeholder = TestInfo {
                id: job.id.clone(),
                status: job.status,
                result: job.result,
                ..Default::default()
            };
            return vec![Self::from_test(request_id, command_id, job, &placeholder)];
        }
        job.tests
            .iter()
            .map(|test| Self::from_test(request_id, command_id, job, test))
            .collect()
    }
}

/// State of one command of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDetail {
    pub id: String,
    pub command_line: String,
    pub state: CommandState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<CancelReason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<ErrorReason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub passed_test_count: u64,
    pub failed_test_count: u64,
    pub total_test_count: u64,
    pub total_module_count: u64,
    pub done_module_count: u64,

    /// Attempts in the order their jobs ended.
    #[serde(default)]
    pub attempts: Vec<CommandAttempt>,

    /// Jobs created for the command.
    #[serde(default)]
    pub job_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

impl CommandDetail {
    /// New command with its first job queued.
    pub fn new(id: impl Into<String>, command_line: impl Into<String>) -> Self {
        let now = now();
        Self {
            id: id.into(),
            command_line: command_line.into(),
            state: CommandState::Queued,
            create_time: Some(now),
            update_time: Some(now),
            ..Default::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn add_job(&mut self, job_id: &str) {
        if !self.job_ids.iter().any(|id| id == job_id) {
            self.job_ids.push(job_id.to_string());
        }
    }

    /// Mark the command as running once one of its tests starts.
    pub fn mark_running(&mut self) {
        if matches!(self.state, CommandState::Unknown | CommandState::Queued) {
            self.state = CommandState::Running;
            self.start_time.get_or_insert_with(now);
            self.update_time = Some(now());
        }
    }

    /// Record an attempt. Attempts are kept even after the command finished.
    pub fn add_attempt(&mut self, attempt: CommandAttempt) {
        if let Some(start) = attempt.start_time {
            if self.start_time.map_or(true, |current| start < current) {
                self.start_time = Some(start);
            }
        }
        self.attempts.push(attempt);
        self.update_time = Some(now());
    }

    /// Move to a terminal state. Returns false if the command already finished.
    pub fn finish(&mut self, state: CommandState) -> bool {
        if self.is_terminal() || !state.is_terminal() {
            return false;
        }
        let now = now();
        self.state = state;
        self.end_time = Some(now);
        self.update_time = Some(now);
        true
    }

    /// Finish with ERROR and the given reason.
    pub fn fail(&mut self, reason: ErrorReason, message: impl Into<String>) -> bool {
        if !self.finish(CommandState::Error) {
            return false;
        }
        self.error_reason = Some(reason);
        self.error_message = Some(message.into());
        true
    }

    /// Finish with CANCELED and the given reason.
    pub fn cancel(&mut self, reason: CancelReason) -> bool {
        if !self.finish(CommandState::Canceled) {
            return false;
        }
        self.cancel_reason = Some(reason);
        true
    }

    /// Whether the command completed with failing tests.
    pub fn has_failed_tests(&self) -> bool {
        self.state == CommandState::Completed && self.failed_test_count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::PRIMARY_DRIVER;
    use std::collections::BTreeMap;

    #[test]
    fn test_status_mapping_table() {
        use CommandState as C;
        use JobStatus as S;
        use TestResult as R;

        assert_eq!(C::from_status_and_result(S::New, R::Unknown), C::Unknown);
        assert_eq!(C::from_status_and_result(S::Assigned, R::Unknown), C::Queued);
        assert_eq!(C::from_status_and_result(S::Running, R::Unknown), C::Running);
        assert_eq!(C::from_status_and_result(S::Done, R::Pass), C::Completed);
        assert_eq!(C::from_status_and_result(S::Done, R::Fail), C::Error);
        assert_eq!(C::from_status_and_result(S::Done, R::Timeout), C::Error);
        assert_eq!(C::from_status_and_result(S::Suspended, R::Pass), C::Canceled);
    }

    #[test]
    fn test_attempt_counts_from_properties() {
        let mut job = JobInfo::new("job", PRIMARY_DRIVER);
        job.sub_device_dimensions = vec![BTreeMap::from([(
            "uuid".to_string(),
            "SERIAL".to_string(),
        )])];
        let test = TestInfo {
            id: "test-1".to_string(),
            status: JobStatus::Done,
            result: TestResult::Pass,
            properties: BTreeMap::from([
                (TRADEFED_TESTS_PASSED.to_string(), "10".to_string()),
                (TRADEFED_TESTS_FAILED.to_string(), "2".to_string()),
            ]),
            ..Default::default()
        };

        let attempt = CommandAttempt::from_test("req", "cmd", &job, &test);
        assert_eq!(attempt.passed_test_count, 10);
        assert_eq!(attempt.failed_test_count, 2);
        assert_eq!(attempt.total_test_count, 12);
        assert_eq!(attempt.state, CommandState::Completed);
        assert_eq!(attempt.device_serials, vec!["SERIAL"]);
        assert_eq!(attempt.job_id, job.id);
    }

    #[test]
    fn test_job_without_tests_yields_one_attempt() {
        let mut job = JobInfo::new("job", "MoblyTest");
        job.status = JobStatus::Suspended;
        let attempts = CommandAttempt::from_job("req", "cmd", &job);
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].state, CommandState::Canceled);
    }

    #[test]
    fn test_finish_only_once() {
        let mut command = CommandDetail::new("cmd", "cts");
        assert!(command.fail(ErrorReason::InvalidRequest, "bad"));
        assert!(!command.finish(CommandState::Completed));
        assert!(!command.cancel(CancelReason::ExternalCancelRequest));
        assert_eq!(command.state, CommandState::Error);
        assert_eq!(command.error_reason, Some(ErrorReason::InvalidRequest));
        assert!(command.cancel_reason.is_none());
    }

    #[test]
    fn test_non_terminal_finish_rejected() {
        let mut command = CommandDetail::new("cmd", "cts");
        assert!(!command.finish(CommandState::Running));
        assert_eq!(command.state, CommandState::Queued);
    }

    #[test]
    fn test_attempts_recorded_after_terminal() {
        let mut command = CommandDetail::new("cmd", "cts");
        command.cancel(CancelReason::ExternalCancelRequest);
        command.add_attempt(CommandAttempt::default());
        assert_eq!(command.attempts.len(), 1);
        assert_eq!(command.state, CommandState::Canceled);
    }

    #[test]
    fn test_mark_running() {
        let mut command = CommandDetail::new("cmd", "cts");
        command.mark_running();
        assert_eq!(command.state, CommandState::Running);
        assert!(command.start_time.is_some());
    }
}
