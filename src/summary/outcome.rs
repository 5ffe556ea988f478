//! Command verdicts and stable exit codes

use serde::{Deserialize, Serialize};

use crate::state::{CommandDetail, CommandState, RequestState};

/// What a command amounted to, from a client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandVerdict {
    /// Completed without failing tests
    Passed,
    /// Completed, some tests failed
    TestsFailed,
    Error,
    Canceled,
    /// Not finished yet
    Pending,
}

impl CommandVerdict {
    pub fn of(command: &CommandDetail) -> Self {
        match command.state {
            CommandState::Completed if command.failed_test_count > 0 => CommandVerdict::TestsFailed,
            CommandState::Completed => CommandVerdict::Passed,
            CommandState::Error => CommandVerdict::Error,
            CommandState::Canceled => CommandVerdict::Canceled,
            CommandState::Unknown | CommandState::Queued | CommandState::Running => {
                CommandVerdict::Pending
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandVerdict::Passed => "passed",
            CommandVerdict::TestsFailed => "tests failed",
            CommandVerdict::Error => "error",
            CommandVerdict::Canceled => "canceled",
            CommandVerdict::Pending => "pending",
        }
    }
}

/// Stable exit codes of `ats-session show`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    /// Completed, every test passed
    Success = 0,
    /// Completed with failing tests
    TestsFailed = 1,
    /// Request ended in ERROR
    Error = 2,
    Canceled = 3,
    /// Request still running
    Running = 4,
}

impl ExitCode {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExitCode::Success),
            1 => Some(ExitCode::TestsFailed),
            2 => Some(ExitCode::Error),
            3 => Some(ExitCode::Canceled),
            4 => Some(ExitCode::Running),
            _ => None,
        }
    }

    /// Exit code of a request in `state` whose commands reached `verdicts`.
    pub fn for_request(state: RequestState, verdicts: &[CommandVerdict]) -> Self {
        match state {
            RequestState::Running => ExitCode::Running,
            RequestState::Canceled => ExitCode::Canceled,
            RequestState::Error => ExitCode::Error,
            RequestState::Completed if verdicts.contains(&CommandVerdict::TestsFailed) => {
                ExitCode::TestsFailed
            }
            RequestState::Completed => ExitCode::Success,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ErrorReason;

    #[test]
    fn test_verdict_of_command() {
        let mut command = CommandDetail::new("c", "cts");
        assert_eq!(CommandVerdict::of(&command), CommandVerdict::Pending);

        command.failed_test_count = 2;
        command.finish(CommandState::Completed);
        assert_eq!(CommandVerdict::of(&command), CommandVerdict::TestsFailed);

        let mut broken = CommandDetail::new("d", "cts");
        broken.fail(ErrorReason::InvalidResource, "bad zip");
        assert_eq!(CommandVerdict::of(&broken), CommandVerdict::Error);
    }

    #[test]
    fn test_exit_codes() {
        use CommandVerdict as V;
        assert_eq!(
            ExitCode::for_request(RequestState::Completed, &[V::Passed, V::Passed]),
            ExitCode::Success
        );
        assert_eq!(
            ExitCode::for_request(RequestState::Completed, &[V::Passed, V::TestsFailed]),
            ExitCode::TestsFailed
        );
        assert_eq!(
            ExitCode::for_request(RequestState::Canceled, &[V::Passed]),
            ExitCode::Canceled
        );
        assert_eq!(ExitCode::from_i32(2), Some(ExitCode::Error));
        assert_eq!(ExitCode::from_i32(9), None);
    }
}
