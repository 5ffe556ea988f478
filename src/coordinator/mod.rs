//! Request coordinator
//!
//! One coordinator per session. It owns the request snapshot, sequences
//! primary and secondary jobs, folds results at session end and triggers
//! retries.
//!
//! Every handler holds the session mutex for its whole body and publishes
//! the snapshot before releasing it. Cancel signals are the exception: the
//! target list is taken under the lock and delivery happens after it is
//! released.
//!
//! The in-memory state can be lost between any two events. Handlers first
//! rehydrate the request from the last published snapshot, then re-derive
//! the primary-job bookkeeping from the runtime's live job list.

mod retry;
mod sequencing;

pub use retry::{is_retry_eligible, retry_request, RETRY_PLUGIN_LABEL};

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ats_protocol::{NewMultiCommandRequest, SessionNotification, SessionRequest};

use crate::cancel::{self, CancelSignal};
use crate::config::OrchestratorConfig;
use crate::exec::CommandRunner;
use crate::job::{command_id, JobInfo};
use crate::orchestrator::{
    CommandOutcome, CommandResult, CreationOutcome, JobCreator, JobOrchestrator,
    OrchestratorError, ResultProcessor, ResultsReport,
};
use crate::runtime::{SessionCreator, SessionEvent, SessionEventHandler, SessionRuntime};
use crate::state::{
    now, CancelReason, CommandAttempt, CommandDetail, CommandState, ErrorReason, RequestDetail,
    RequestState,
};

/// Message recorded when a request produced no job at all.
pub const NO_JOBS_CREATED: &str = "no jobs created";

/// Message recorded for a command whose jobs left no usable result.
pub const NO_VALID_RESULT: &str = "no valid test result";

/// Collaborators of a coordinator.
#[derive(Clone)]
pub struct SessionServices {
    pub runtime: Arc<dyn SessionRuntime>,
    pub session_creator: Arc<dyn SessionCreator>,
    pub job_creator: Arc<dyn JobCreator>,
    pub result_processor: Arc<dyn ResultProcessor>,
    pub command_runner: Arc<dyn CommandRunner>,
}

/// Mutable session state, guarded by the session mutex.
struct SessionState {
    detail: RequestDetail,
    request: Option<NewMultiCommandRequest>,
    orchestrator: JobOrchestrator,
    /// Created primary jobs not yet submitted, in command order
    pending_primary: VecDeque<JobInfo>,
    /// Submitted primary jobs whose end has not been processed
    running_primary: usize,
    /// Whether the primary bookkeeping reflects the runtime
    primary_synced: bool,
    secondary_created: bool,
    started_tests: BTreeSet<String>,
    ended_jobs: HashSet<String>,
    /// Whether the last published snapshot has been consulted
    loaded: bool,
}

/// Coordinator of one session
pub struct RequestCoordinator {
    session_id: String,
    runtime: Arc<dyn SessionRuntime>,
    session_creator: Arc<dyn SessionCreator>,
    config: OrchestratorConfig,
    inner: Mutex<SessionState>,
}

impl RequestCoordinator {
    pub fn new(services: SessionServices, config: OrchestratorConfig) -> Self {
        let session_id = services.runtime.session_id();
        let orchestrator = JobOrchestrator::new(
            session_id.clone(),
            config.clone(),
            services.job_creator,
            services.result_processor,
            services.command_runner,
        );
        Self {
            inner: Mutex::new(SessionState {
                detail: RequestDetail::new(session_id.clone()),
                request: None,
                orchestrator,
                pending_primary: VecDeque::new(),
                running_primary: 0,
                primary_synced: false,
                secondary_created: false,
                started_tests: BTreeSet::new(),
                ended_jobs: HashSet::new(),
                loaded: false,
            }),
            session_id,
            runtime: services.runtime,
            session_creator: services.session_creator,
            config,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Deep copy of the current request state.
    pub fn snapshot(&self) -> RequestDetail {
        let mut state = self.lock();
        self.ensure_loaded(&mut state);
        state.detail.clone()
    }

    #[tracing::instrument(skip_all, fields(session_id = %self.session_id))]
    pub fn on_session_starting(&self, request: SessionRequest) {
        let mut state = self.lock();
        self.ensure_loaded(&mut state);

        if state.request.is_some() {
            tracing::info!("session already started, resuming");
            if !state.primary_synced {
                self.resync_primary(&mut state, None);
            }
            self.publish(&mut state);
            return;
        }

        let Some(request) = request.as_new_multi_command().cloned() else {
            tracing::warn!("unsupported request kind, session ignored");
            return;
        };

        state.detail.original_request = Some(request.clone());
        state.detail.max_retry_on_test_failures = request.max_retry_on_test_failures;
        state.detail.start_time = Some(now());
        state.request = Some(request.clone());
        state.primary_synced = true;

        if let Err(e) = request.validate() {
            tracing::warn!(error = %e, "invalid request");
            fail_request(&mut state.detail, ErrorReason::InvalidRequest, &e.to_string());
            self.publish(&mut state);
            return;
        }

        if state.detail.state == RequestState::Canceled {
            tracing::info!("cancellation requested before job creation");
            self.publish(&mut state);
            return;
        }

        self.start_jobs(&mut state, &request);

        if state.detail.state == RequestState::Running
            && state.pending_primary.is_empty()
            && state.running_primary == 0
            && self.runtime.all_jobs().is_empty()
        {
            tracing::warn!("no job created for any command");
            fail_request(&mut state.detail, ErrorReason::InvalidRequest, NO_JOBS_CREATED);
        }
        self.publish(&mut state);
    }

    #[tracing::instrument(skip_all, fields(session_id = %self.session_id, job_id = %job_id, test_id = %test_id))]
    pub fn on_test_starting(&self, job_id: &str, test_id: &str) {
        let mut state = self.lock();
        self.ensure_loaded(&mut state);

        if state.detail.state == RequestState::Canceled {
            let signal = cancel_signal(&state.detail);
            drop(state);
            tracing::info!("test started after cancellation");
            cancel::deliver(self.runtime.as_ref(), &[test_id.to_string()], &signal);
            return;
        }

        state.started_tests.insert(test_id.to_string());
        if let Some(id) = self.owning_command(&state, job_id) {
            if let Some(command) = state.detail.commands.get_mut(&id) {
                command.mark_running();
            }
        }
        self.publish(&mut state);
    }

    #[tracing::instrument(skip_all, fields(session_id = %self.session_id, job_id = %job.id))]
    pub fn on_job_ended(&self, job: JobInfo) {
        let mut state = self.lock();
        self.ensure_loaded(&mut state);

        let Some(request) = state.request.clone() else {
            tracing::warn!("job ended before the session started");
            return;
        };

        let first_end = state.ended_jobs.insert(job.id.clone());
        if !first_end || has_attempt_of(&state.detail, &job.id) {
            tracing::debug!("job end already recorded");
            return;
        }

        self.record_attempts(&mut state, &request, &job);
        for test in &job.tests {
            state.started_tests.remove(&test.id);
        }

        if job.is_primary() {
            self.on_primary_job_ended(&mut state, &job.id);
        }
        self.publish(&mut state);
    }

    #[tracing::instrument(skip_all, fields(session_id = %self.session_id))]
    pub fn on_notification(&self, notification: SessionNotification) {
        let reason = match notification {
            SessionNotification::CancelSession { reason } => reason,
            SessionNotification::Unsupported => {
                tracing::debug!("unsupported notification ignored");
                return;
            }
        };

        let mut state = self.lock();
        self.ensure_loaded(&mut state);

        if state.detail.state == RequestState::Running {
            tracing::info!(reason = reason.as_deref().unwrap_or(""), "canceling request");
            if let Err(e) = state.detail.cancel(CancelReason::ExternalCancelRequest) {
                tracing::warn!(error = %e, "cannot cancel request");
            }
        } else {
            tracing::info!(state = ?state.detail.state, "cancel notification for a finished request");
        }
        self.drop_pending_primary(&mut state, CancelReason::ExternalCancelRequest);

        let targets: Vec<String> = if state.detail.state == RequestState::Canceled {
            let mut targets = state.started_tests.clone();
            for job in self.runtime.all_jobs() {
                targets.extend(job.running_test_ids());
            }
            targets.into_iter().collect()
        } else {
            Vec::new()
        };
        let signal = cancel_signal(&state.detail);
        self.publish(&mut state);
        drop(state);

        cancel::deliver(self.runtime.as_ref(), &targets, &signal);
    }

    /// Process results, settle the final state, then retry and clean up.
    ///
    /// A result processing failure still leaves the request terminal
    /// before it is returned.
    #[tracing::instrument(skip_all, fields(session_id = %self.session_id))]
    pub fn on_session_ended(&self) -> Result<(), OrchestratorError> {
        let mut state = self.lock();
        self.ensure_loaded(&mut state);

        let Some(request) = state.request.clone() else {
            tracing::warn!("session ended before it started");
            return Ok(());
        };
        let jobs = self.runtime.all_jobs();

        let report = match state.orchestrator.process_results(&request, &jobs) {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "result processing failed");
                let reason = e.reason();
                let message = e.to_string();
                fail_request(&mut state.detail, reason, &message);
                finish_leftover_commands(&mut state.detail, reason, &message);
                self.publish(&mut state);
                state.orchestrator.cleanup(&request, &jobs);
                return Err(e);
            }
        };

        fold_results(&mut state.detail, report);
        finish_leftover_commands(
            &mut state.detail,
            ErrorReason::UnknownReason,
            "command did not finish",
        );
        settle_request(&mut state.detail);
        tracing::info!(state = ?state.detail.state, "request finished");
        self.publish(&mut state);

        if is_retry_eligible(&state.detail) {
            self.trigger_retry(&mut state, &request);
        }
        state.orchestrator.cleanup(&request, &jobs);
        Ok(())
    }

    /// Create and submit the first jobs of a fresh request.
    fn start_jobs(&self, state: &mut SessionState, request: &NewMultiCommandRequest) {
        let creation = state.orchestrator.create_primary_jobs(request);
        apply_outcomes(&mut state.detail, &creation.outcomes, true);

        if creation.aborted {
            let reason = creation
                .first_failure()
                .map(|(_, reason, _)| cancel_reason_for(reason))
                .unwrap_or(CancelReason::InvalidRequest);
            for job in &creation.jobs {
                if let Some(command) = job
                    .command_id_property()
                    .and_then(|id| state.detail.commands.get_mut(id))
                {
                    command.cancel(reason);
                }
            }
            return;
        }

        state.pending_primary = creation.jobs.into();
        if !self.submit_next_primary(state) {
            self.create_secondary_jobs(state);
        }
    }

    fn record_attempts(
        &self,
        state: &mut SessionState,
        request: &NewMultiCommandRequest,
        job: &JobInfo,
    ) {
        let Some(id) = state.orchestrator.command_id_of(job) else {
            tracing::warn!("job has no owning command");
            return;
        };
        let command = state
            .detail
            .commands
            .entry(id.clone())
            .or_insert_with(|| CommandDetail::new(id.clone(), command_line_of(request, &id)));
        command.add_job(&job.id);
        for attempt in CommandAttempt::from_job(&self.session_id, &id, job) {
            command.add_attempt(attempt);
        }
        state.detail.touch();
    }

    /// Command owning `job_id`, resolving through the runtime after a restart.
    fn owning_command(&self, state: &SessionState, job_id: &str) -> Option<String> {
        state
            .orchestrator
            .resolve_command_id_of_job(job_id)
            .or_else(|| {
                self.runtime
                    .all_jobs()
                    .into_iter()
                    .find(|j| j.id == job_id)
                    .and_then(|j| j.command_id_property().map(str::to_string))
            })
    }

    /// Rehydrate from the last published snapshot, once.
    fn ensure_loaded(&self, state: &mut SessionState) {
        if state.loaded {
            return;
        }
        state.loaded = true;
        if state.request.is_some() {
            return;
        }
        let Some(previous) = self.runtime.last_output() else {
            return;
        };
        if previous.id != self.session_id {
            tracing::warn!(found = %previous.id, "ignoring snapshot of another session");
            return;
        }
        tracing::info!(state = ?previous.state, "resuming from published snapshot");
        state.request = previous.original_request.clone();
        state.detail = previous;
        state.primary_synced = false;
    }

    fn publish(&self, state: &mut SessionState) {
        state.detail.touch();
        self.runtime.publish_output(&state.detail);
        if let Some(dir) = &self.config.snapshot.dir {
            if let Err(e) = state.detail.write_to_dir(dir) {
                tracing::warn!(dir = %dir.display(), error = %e, "failed to persist snapshot");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionEventHandler for RequestCoordinator {
    type Error = OrchestratorError;

    fn handle(&self, event: SessionEvent) -> Result<(), OrchestratorError> {
        match event {
            SessionEvent::SessionStarting { request } => self.on_session_starting(request),
            SessionEvent::TestStarting { job_id, test_id } => {
                self.on_test_starting(&job_id, &test_id)
            }
            SessionEvent::JobEnded { job } => self.on_job_ended(job),
            SessionEvent::SessionEnded => return self.on_session_ended(),
            SessionEvent::Notification(notification) => self.on_notification(notification),
        }
        Ok(())
    }
}

/// Record job creation outcomes on the request.
///
/// With `fail_request_on_error`, a failed command also fails the request;
/// otherwise the failure is only appended to the error chain.
fn apply_outcomes(
    detail: &mut RequestDetail,
    outcomes: &[CommandOutcome],
    fail_request_on_error: bool,
) {
    for outcome in outcomes {
        match &outcome.outcome {
            CreationOutcome::Created { job_ids } => {
                let command = detail
                    .commands
                    .entry(outcome.command_id.clone())
                    .or_insert_with(|| {
                        CommandDetail::new(outcome.command_id.clone(), outcome.command_line.clone())
                    });
                for job_id in job_ids {
                    command.add_job(job_id);
                }
            }
            CreationOutcome::Skipped { message } => {
                tracing::debug!(command_id = %outcome.command_id, message = %message, "command skipped");
            }
            CreationOutcome::Failed { reason, message } => {
                detail
                    .commands
                    .entry(outcome.command_id.clone())
                    .or_insert_with(|| {
                        CommandDetail::new(outcome.command_id.clone(), outcome.command_line.clone())
                    })
                    .fail(*reason, message.clone());
                if fail_request_on_error {
                    fail_request(detail, *reason, message);
                } else {
                    detail.append_error_message(*reason, message);
                }
            }
        }
    }
}

/// Fail a running request, or only extend the error chain of a finished one.
fn fail_request(detail: &mut RequestDetail, reason: ErrorReason, message: &str) {
    if detail.state == RequestState::Running {
        if let Err(e) = detail.fail(reason, message) {
            tracing::warn!(error = %e, "cannot fail request");
        }
    } else {
        detail.append_error_message(reason, message);
    }
}

/// Fold processed results into the commands. Counters are kept for a
/// canceled request but its commands end CANCELED.
fn fold_results(detail: &mut RequestDetail, report: ResultsReport) {
    let canceled = (detail.state == RequestState::Canceled).then(|| {
        detail
            .cancel_reason
            .unwrap_or(CancelReason::ExternalCancelRequest)
    });
    for (id, result) in report.commands {
        let Some(command) = detail.commands.get_mut(&id) else {
            continue;
        };
        match result {
            CommandResult::Summary(summary) => {
                command.passed_test_count = summary.passed_test_count;
                command.failed_test_count = summary.failed_test_count;
                command.total_test_count = summary.total_test_count;
                command.done_module_count = summary.done_module_count;
                command.total_module_count = summary.total_module_count;
                match canceled {
                    Some(reason) => command.cancel(reason),
                    None => command.finish(CommandState::Completed),
                };
            }
            CommandResult::NoResult => {
                command.fail(ErrorReason::ResultProcessingError, NO_VALID_RESULT);
            }
            CommandResult::NotRun => {}
        }
    }
    detail.test_contexts.extend(report.test_contexts);
}

/// Move every unfinished command to a terminal state: CANCELED for a
/// canceled request, ERROR otherwise.
fn finish_leftover_commands(detail: &mut RequestDetail, reason: ErrorReason, message: &str) {
    let canceled = detail.state == RequestState::Canceled;
    let cancel_reason = detail
        .cancel_reason
        .unwrap_or(CancelReason::ExternalCancelRequest);
    for command in detail.commands.values_mut().filter(|c| !c.is_terminal()) {
        if canceled {
            command.cancel(cancel_reason);
        } else {
            command.fail(reason, message);
        }
    }
}

/// RUNNING → COMPLETED when every command completed, ERROR otherwise.
fn settle_request(detail: &mut RequestDetail) {
    if detail.state != RequestState::Running {
        return;
    }
    if detail.all_commands_completed() {
        if let Err(e) = detail.complete() {
            tracing::warn!(error = %e, "cannot complete request");
        }
        return;
    }

    let (reason, message) = detail
        .commands
        .values()
        .find(|c| c.state != CommandState::Completed)
        .map(|c| {
            (
                c.error_reason.unwrap_or(ErrorReason::UnknownReason),
                format!(
                    "command {} ended {:?}: {}",
                    c.id,
                    c.state,
                    c.error_message.as_deref().unwrap_or("no detail")
                ),
            )
        })
        .unwrap_or((ErrorReason::UnknownReason, NO_JOBS_CREATED.to_string()));
    fail_request(detail, reason, &message);
}

fn cancel_reason_for(reason: ErrorReason) -> CancelReason {
    match reason {
        ErrorReason::InvalidResource => CancelReason::InvalidResource,
        ErrorReason::InvalidRequest => CancelReason::InvalidRequest,
        ErrorReason::ResultProcessingError | ErrorReason::UnknownReason => {
            CancelReason::CommandNotAvailable
        }
    }
}

fn cancel_signal(detail: &RequestDetail) -> CancelSignal {
    let reason = detail
        .cancel_reason
        .map(|r| r.to_string())
        .unwrap_or_else(|| CancelReason::ExternalCancelRequest.to_string());
    CancelSignal::terminate(format!("request {} canceled: {}", detail.id, reason))
}

fn has_attempt_of(detail: &RequestDetail, job_id: &str) -> bool {
    detail
        .commands
        .values()
        .any(|c| c.attempts.iter().any(|a| a.job_id == job_id))
}

fn command_line_of(request: &NewMultiCommandRequest, id: &str) -> String {
    request
        .commands
        .iter()
        .find(|info| command_id(request, info) == id)
        .map(|info| info.command_line.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::TestResult;
    use crate::mock::{
        MockCommandRunner, MockJobCreator, MockResultProcessor, MockRuntime, MockSessionCreator,
    };
    use crate::orchestrator::JobCreationError;
    use ats_protocol::{CommandInfo, TestEnvironment, TestResource};
    use tempfile::TempDir;

    struct Harness {
        dir: TempDir,
        runtime: Arc<MockRuntime>,
        creator: Arc<MockJobCreator>,
        coordinator: RequestCoordinator,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new("s1"));
        let creator = Arc::new(MockJobCreator::new());
        let config = OrchestratorConfig {
            gen_dir: dir.path().join("gen"),
            ..Default::default()
        };
        let coordinator = RequestCoordinator::new(
            SessionServices {
                runtime: runtime.clone(),
                session_creator: Arc::new(MockSessionCreator::new()),
                job_creator: creator.clone(),
                result_processor: Arc::new(MockResultProcessor::new()),
                command_runner: Arc::new(MockCommandRunner::new()),
            },
            config,
        );
        Harness {
            dir,
            runtime,
            creator,
            coordinator,
        }
    }

    fn request(dir: &TempDir, lines: &[&str]) -> SessionRequest {
        SessionRequest::new_multi_command(NewMultiCommandRequest {
            commands: lines
                .iter()
                .map(|l| CommandInfo {
                    command_line: l.to_string(),
                    ..Default::default()
                })
                .collect(),
            test_resources: vec![TestResource {
                name: "android-cts.zip".to_string(),
                url: "file:///data/android-cts.zip".to_string(),
            }],
            test_environment: TestEnvironment {
                output_file_upload_url: format!("file://{}", dir.path().join("out").display()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[test]
    fn test_start_submits_first_primary_only() {
        let h = harness();
        h.coordinator
            .on_session_starting(request(&h.dir, &["cts -m A", "cts -m B"]));

        let jobs = h.runtime.jobs();
        assert_eq!(jobs.len(), 1);
        let snapshot = h.coordinator.snapshot();
        assert_eq!(snapshot.state, RequestState::Running);
        assert_eq!(snapshot.commands.len(), 2);
        assert!(snapshot
            .commands
            .values()
            .all(|c| c.state == CommandState::Queued));
        assert!(snapshot.original_request.is_some());
    }

    #[test]
    fn test_empty_request_has_no_jobs() {
        let h = harness();
        h.coordinator.on_session_starting(request(&h.dir, &[]));

        let snapshot = h.runtime.latest().unwrap();
        assert_eq!(snapshot.state, RequestState::Error);
        assert_eq!(snapshot.error_reason, Some(ErrorReason::InvalidRequest));
        assert!(snapshot.error_message.unwrap().contains(NO_JOBS_CREATED));
    }

    #[test]
    fn test_blank_command_line_is_invalid() {
        let h = harness();
        h.coordinator.on_session_starting(request(&h.dir, &["  "]));

        let snapshot = h.coordinator.snapshot();
        assert_eq!(snapshot.state, RequestState::Error);
        assert_eq!(snapshot.error_reason, Some(ErrorReason::InvalidRequest));
        assert!(h.runtime.jobs().is_empty());
    }

    #[test]
    fn test_primary_failure_cancels_created_commands() {
        let h = harness();
        h.creator.fail_primary(
            "cts -m B",
            JobCreationError::InvalidResource("corrupt archive".into()),
        );
        h.coordinator
            .on_session_starting(request(&h.dir, &["cts -m A", "cts -m B", "cts -m C"]));

        let snapshot = h.coordinator.snapshot();
        assert_eq!(snapshot.state, RequestState::Error);
        assert_eq!(snapshot.error_reason, Some(ErrorReason::InvalidResource));
        assert_eq!(
            snapshot.error_chain(),
            vec!["INVALID_RESOURCE: corrupt archive"]
        );
        assert!(h.runtime.jobs().is_empty());
        assert_eq!(h.creator.primary_calls(), vec!["cts -m A", "cts -m B"]);

        let states: Vec<CommandState> = snapshot.commands.values().map(|c| c.state).collect();
        assert!(states.contains(&CommandState::Canceled));
        assert!(states.contains(&CommandState::Error));
        assert_eq!(states.len(), 2);
    }

    #[test]
    fn test_duplicate_job_end_recorded_once() {
        let h = harness();
        h.coordinator
            .on_session_starting(request(&h.dir, &["cts -m A", "cts -m B"]));
        let first = h.runtime.jobs()[0].id.clone();
        let SessionEvent::JobEnded { job } = h
            .runtime
            .finish_job(&first, TestResult::Pass, &[])
            .unwrap()
        else {
            unreachable!()
        };

        h.coordinator.on_job_ended(job.clone());
        h.coordinator.on_job_ended(job);

        assert_eq!(h.runtime.jobs().len(), 2);
        let attempts: usize = h
            .coordinator
            .snapshot()
            .commands
            .values()
            .map(|c| c.attempts.len())
            .sum();
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_unsupported_request_ignored() {
        let h = harness();
        h.coordinator.on_session_starting(SessionRequest {
            schema_version: 1,
            request: ats_protocol::RequestBody::Unsupported,
        });
        assert!(h.runtime.published().is_empty());
        assert!(h.coordinator.snapshot().original_request.is_none());
    }

    #[test]
    fn test_settle_picks_first_unfinished_reason() {
        let mut detail = RequestDetail::new("s1");
        let mut ok = CommandDetail::new("a", "cts -m A");
        ok.finish(CommandState::Completed);
        let mut bad = CommandDetail::new("b", "cts -m B");
        bad.fail(ErrorReason::ResultProcessingError, NO_VALID_RESULT);
        detail.commands.insert("a".into(), ok);
        detail.commands.insert("b".into(), bad);

        settle_request(&mut detail);

        assert_eq!(detail.state, RequestState::Error);
        assert_eq!(detail.error_reason, Some(ErrorReason::ResultProcessingError));
        assert!(detail.error_message.unwrap().contains(NO_VALID_RESULT));
    }

    #[test]
    fn test_settle_keeps_cancellation() {
        let mut detail = RequestDetail::new("s1");
        detail.cancel(CancelReason::ExternalCancelRequest).unwrap();
        let mut done = CommandDetail::new("a", "cts -m A");
        done.finish(CommandState::Completed);
        detail.commands.insert("a".into(), done);

        settle_request(&mut detail);
        assert_eq!(detail.state, RequestState::Canceled);
    }
}
