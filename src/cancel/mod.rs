//! Cooperative cancellation of running tests
//!
//! A cancel notification flips the request to CANCELED and then asks every
//! started test to terminate gracefully. Delivery happens outside the
//! session lock; failures are logged and counted, never escalated.

use serde::{Deserialize, Serialize};

use crate::runtime::SessionRuntime;

/// SIGTERM
pub const GRACEFUL_TERMINATION_SIGNAL: i32 = 15;

/// Message asking a remote test process to terminate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelSignal {
    pub signal: i32,
    pub reason: String,
}

impl CancelSignal {
    /// Graceful termination with the given reason.
    pub fn terminate(reason: impl Into<String>) -> Self {
        Self {
            signal: GRACEFUL_TERMINATION_SIGNAL,
            reason: reason.into(),
        }
    }
}

/// Delivery result for one test
#[derive(Debug, Clone)]
pub struct TestCancellation {
    pub test_id: String,
    /// Error message if delivery failed
    pub error: Option<String>,
}

impl TestCancellation {
    pub fn delivered(&self) -> bool {
        self.error.is_none()
    }
}

/// Delivery results for a session
#[derive(Debug, Clone)]
pub struct SessionCancellation {
    pub session_id: String,
    pub tests: Vec<TestCancellation>,
    pub sent_count: usize,
    pub failed_count: usize,
}

impl SessionCancellation {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            tests: Vec::new(),
            sent_count: 0,
            failed_count: 0,
        }
    }

    pub fn add(&mut self, result: TestCancellation) {
        if result.delivered() {
            self.sent_count += 1;
        } else {
            self.failed_count += 1;
        }
        self.tests.push(result);
    }

    pub fn all_delivered(&self) -> bool {
        self.failed_count == 0
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        if self.tests.is_empty() {
            return format!("Session {} has no tests to cancel", self.session_id);
        }
        let mut parts = vec![format!("{} signaled", self.sent_count)];
        if self.failed_count > 0 {
            parts.push(format!("{} failed", self.failed_count));
        }
        format!(
            "Session {}: {} ({})",
            self.session_id,
            parts.join(", "),
            self.tests.len()
        )
    }
}

/// Send `signal` to every test in `test_ids`, collecting outcomes.
pub fn deliver(
    runtime: &dyn SessionRuntime,
    test_ids: &[String],
    signal: &CancelSignal,
) -> SessionCancellation {
    let mut report = SessionCancellation::new(runtime.session_id());
    for test_id in test_ids {
        let error = match runtime.send_to_test(test_id, signal) {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(test_id = %test_id, error = %e, "failed to deliver cancel signal");
                Some(e.to_string())
            }
        };
        report.add(TestCancellation {
            test_id: test_id.clone(),
            error,
        });
    }
    if !report.tests.is_empty() {
        tracing::info!("{}", report.summary());
    }
    report
}
