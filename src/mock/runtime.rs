//! Mock session runtime and session creator

use std::collections::HashSet;
use std::sync::Mutex;

use ats_protocol::CreateSessionRequest;

use super::lock;
use crate::cancel::CancelSignal;
use crate::job::{JobInfo, JobStatus, TestInfo, TestResult};
use crate::runtime::{RuntimeError, SessionEvent, SessionRuntime, SessionCreator};
use crate::state::RequestDetail;

/// In-memory session hosting one coordinator.
#[derive(Debug)]
pub struct MockRuntime {
    session_id: String,
    jobs: Mutex<Vec<JobInfo>>,
    published: Mutex<Vec<RequestDetail>>,
    last_output: Mutex<Option<RequestDetail>>,
    signaled: Mutex<Vec<(String, CancelSignal)>>,
    failing_tests: Mutex<HashSet<String>>,
    rejections: Mutex<usize>,
}

impl MockRuntime {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            jobs: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            last_output: Mutex::new(None),
            signaled: Mutex::new(Vec::new()),
            failing_tests: Mutex::new(HashSet::new()),
            rejections: Mutex::new(0),
        }
    }

    /// Start with a previously published output, as after a restart.
    pub fn with_last_output(self, detail: RequestDetail) -> Self {
        *lock(&self.last_output) = Some(detail);
        self
    }

    /// Start with jobs already in the session, as after a restart.
    pub fn with_jobs(self, jobs: Vec<JobInfo>) -> Self {
        *lock(&self.jobs) = jobs;
        self
    }

    /// Reject the next `count` submissions.
    pub fn reject_next_jobs(&self, count: usize) {
        *lock(&self.rejections) = count;
    }

    /// Make message delivery to `test_id` fail.
    pub fn fail_delivery_to(&self, test_id: &str) {
        lock(&self.failing_tests).insert(test_id.to_string());
    }

    /// Jobs in submission order.
    pub fn jobs(&self) -> Vec<JobInfo> {
        lock(&self.jobs).clone()
    }

    pub fn job(&self, job_id: &str) -> Option<JobInfo> {
        lock(&self.jobs).iter().find(|j| j.id == job_id).cloned()
    }

    /// Every published snapshot, oldest first.
    pub fn published(&self) -> Vec<RequestDetail> {
        lock(&self.published).clone()
    }

    /// Most recent snapshot.
    pub fn latest(&self) -> Option<RequestDetail> {
        lock(&self.last_output).clone()
    }

    /// Tests that received a cancel signal.
    pub fn signaled_tests(&self) -> Vec<String> {
        lock(&self.signaled).iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn signals(&self) -> Vec<(String, CancelSignal)> {
        lock(&self.signaled).clone()
    }

    /// Start a running test on `job_id` and return the matching event.
    pub fn start_test(&self, job_id: &str, test_id: &str) -> SessionEvent {
        let mut jobs = lock(&self.jobs);
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Running;
            job.tests.push(TestInfo {
                id: test_id.to_string(),
                status: JobStatus::Running,
                ..Default::default()
            });
        }
        SessionEvent::TestStarting {
            job_id: job_id.to_string(),
            test_id: test_id.to_string(),
        }
    }

    /// Finish `job_id` with `result`, stamping `properties` on its tests.
    ///
    /// A job without tests gets one, named `<job id>-test`. Returns the
    /// matching event, or `None` for an unknown job.
    pub fn finish_job(
        &self,
        job_id: &str,
        result: TestResult,
        properties: &[(&str, &str)],
    ) -> Option<SessionEvent> {
        self.end_job(job_id, JobStatus::Done, result, properties)
    }

    /// Suspend `job_id`, as the scheduler does for a canceled job.
    pub fn suspend_job(&self, job_id: &str) -> Option<SessionEvent> {
        self.end_job(job_id, JobStatus::Suspended, TestResult::Abort, &[])
    }

    fn end_job(
        &self,
        job_id: &str,
        status: JobStatus,
        result: TestResult,
        properties: &[(&str, &str)],
    ) -> Option<SessionEvent> {
        let mut jobs = lock(&self.jobs);
        let job = jobs.iter_mut().find(|j| j.id == job_id)?;
        if job.tests.is_empty() {
            job.tests.push(TestInfo {
                id: format!("{}-test", job_id),
                ..Default::default()
            });
        }
        for test in &mut job.tests {
            test.status = status;
            test.result = result;
            for (key, value) in properties {
                test.properties.insert(key.to_string(), value.to_string());
            }
        }
        job.status = status;
        job.result = result;
        Some(SessionEvent::JobEnded { job: job.clone() })
    }
}

impl SessionRuntime for MockRuntime {
    fn session_id(&self) -> String {
        self.session_id.clone()
    }

    fn add_job(&self, job: JobInfo) -> Result<(), RuntimeError> {
        let mut rejections = lock(&self.rejections);
        if *rejections > 0 {
            *rejections -= 1;
            return Err(RuntimeError::JobRejected(job.id));
        }
        lock(&self.jobs).push(job);
        Ok(())
    }

    fn all_jobs(&self) -> Vec<JobInfo> {
        self.jobs()
    }

    fn publish_output(&self, detail: &RequestDetail) {
        lock(&self.published).push(detail.clone());
        *lock(&self.last_output) = Some(detail.clone());
    }

    fn last_output(&self) -> Option<RequestDetail> {
        self.latest()
    }

    fn send_to_test(&self, test_id: &str, signal: &CancelSignal) -> Result<(), RuntimeError> {
        if lock(&self.failing_tests).contains(test_id) {
            return Err(RuntimeError::Delivery(format!("test {} is gone", test_id)));
        }
        lock(&self.signaled).push((test_id.to_string(), signal.clone()));
        Ok(())
    }
}

/// Records session creation requests.
#[derive(Debug, Default)]
pub struct MockSessionCreator {
    requests: Mutex<Vec<CreateSessionRequest>>,
    failure: Mutex<Option<String>>,
}

impl MockSessionCreator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every creation fail with `message`.
    pub fn fail_with(&self, message: &str) {
        *lock(&self.failure) = Some(message.to_string());
    }

    pub fn requests(&self) -> Vec<CreateSessionRequest> {
        lock(&self.requests).clone()
    }
}

impl SessionCreator for MockSessionCreator {
    fn create_session(&self, request: CreateSessionRequest) -> Result<String, RuntimeError> {
        if let Some(message) = lock(&self.failure).clone() {
            return Err(RuntimeError::SessionCreation(message));
        }
        let mut requests = lock(&self.requests);
        requests.push(request);
        Ok(format!("retry-session-{}", requests.len()))
    }
}
