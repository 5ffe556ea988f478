//! Shared harness for session integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ats_protocol::{CommandInfo, NewMultiCommandRequest, SessionRequest, TestEnvironment, TestResource};
use ats_session::config::OrchestratorConfig;
use ats_session::job::{command_id, TestResult};
use ats_session::mock::{
    MockCommandRunner, MockJobCreator, MockResultProcessor, MockRuntime, MockSessionCreator,
};
use ats_session::runtime::SessionEventHandler;
use ats_session::{OrchestratorError, RequestCoordinator, SessionEvent, SessionServices};

pub const PASSED: &str = "tradefed_tests_passed";
pub const FAILED: &str = "tradefed_tests_failed";

/// One coordinator wired to mock collaborators.
pub struct Session {
    pub root: PathBuf,
    pub runtime: Arc<MockRuntime>,
    pub sessions: Arc<MockSessionCreator>,
    pub jobs: Arc<MockJobCreator>,
    pub results: Arc<MockResultProcessor>,
    pub runner: Arc<MockCommandRunner>,
    pub coordinator: Arc<RequestCoordinator>,
}

impl Session {
    pub fn new(root: &Path, session_id: &str) -> Self {
        Self::with_runtime(root, MockRuntime::new(session_id))
    }

    /// Host a coordinator on an existing runtime, as after a restart.
    pub fn with_runtime(root: &Path, runtime: MockRuntime) -> Self {
        Self::with_config(root, runtime, config(root))
    }

    pub fn with_config(root: &Path, runtime: MockRuntime, config: OrchestratorConfig) -> Self {
        let runtime = Arc::new(runtime);
        let sessions = Arc::new(MockSessionCreator::new());
        let jobs = Arc::new(MockJobCreator::new());
        let results = Arc::new(MockResultProcessor::new());
        let runner = Arc::new(MockCommandRunner::new());
        let coordinator = Arc::new(RequestCoordinator::new(
            SessionServices {
                runtime: runtime.clone(),
                session_creator: sessions.clone(),
                job_creator: jobs.clone(),
                result_processor: results.clone(),
                command_runner: runner.clone(),
            },
            config,
        ));
        Self {
            root: root.to_path_buf(),
            runtime,
            sessions,
            jobs,
            results,
            runner,
            coordinator,
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("out")
    }

    pub fn start(&self, request: NewMultiCommandRequest) {
        self.send(SessionEvent::SessionStarting {
            request: SessionRequest::new_multi_command(request),
        })
        .unwrap();
    }

    pub fn send(&self, event: SessionEvent) -> Result<(), OrchestratorError> {
        self.coordinator.handle(event)
    }

    /// Finish `job_id` with the given test counts and deliver its end.
    pub fn finish(&self, job_id: &str, passed: u64, failed: u64) {
        let result = if failed > 0 { TestResult::Fail } else { TestResult::Pass };
        let passed = passed.to_string();
        let failed = failed.to_string();
        let event = self
            .runtime
            .finish_job(job_id, result, &[(PASSED, &passed), (FAILED, &failed)])
            .expect("job exists");
        self.send(event).unwrap();
    }

    /// Finish the most recently submitted job.
    pub fn finish_last(&self, passed: u64, failed: u64) -> String {
        let job_id = self.last_job_id();
        self.finish(&job_id, passed, failed);
        job_id
    }

    pub fn last_job_id(&self) -> String {
        self.runtime.jobs().last().expect("a job was submitted").id.clone()
    }

    pub fn end(&self) -> Result<(), OrchestratorError> {
        self.send(SessionEvent::SessionEnded)
    }
}

pub fn config(root: &Path) -> OrchestratorConfig {
    OrchestratorConfig {
        gen_dir: root.join("gen"),
        tmp_dir: root.join("tmp"),
        ..Default::default()
    }
}

/// A request for `lines` against a local CTS archive, writing under `<root>/out`.
pub fn request(root: &Path, lines: &[&str]) -> NewMultiCommandRequest {
    NewMultiCommandRequest {
        commands: lines
            .iter()
            .map(|line| CommandInfo {
                command_line: line.to_string(),
                ..Default::default()
            })
            .collect(),
        test_resources: vec![TestResource {
            name: "android-cts.zip".to_string(),
            url: "file:///data/xts/android-cts.zip".to_string(),
        }],
        test_environment: TestEnvironment {
            output_file_upload_url: format!("file://{}", root.join("out").display()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Id of the command with `line` in `request`.
pub fn id_of(request: &NewMultiCommandRequest, line: &str) -> String {
    let info = request
        .commands
        .iter()
        .find(|c| c.command_line == line)
        .expect("command in request");
    command_id(request, info)
}
