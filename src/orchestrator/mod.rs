//! Job orchestration and result aggregation
//!
//! The orchestrator owns the command ↔ job indices and the cache of
//! validated per-command parameters for one session. It turns commands into
//! jobs through a [`JobCreator`] and folds finished jobs into per-command
//! summaries through a [`ResultProcessor`].

mod collaborators;
mod mount;
mod request_info;
mod results;

pub use collaborators::{
    JobCreationError, JobCreator, ResultContext, ResultProcessingError, ResultProcessor,
    ResultSummary,
};
pub use mount::{MountError, ResourceMounter};
pub use request_info::{find_xts_archive, xts_mount_point, SessionRequestInfo};
pub use results::{
    command_output_dir, copy_retry_files, create_fresh_dir, lock_result_processing, merge_up,
    output_root, NOT_RETRY_FILES,
};

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use ats_protocol::{CommandInfo, NewMultiCommandRequest, TestContext, TestResource, FILE_URL_PREFIX};

use crate::config::OrchestratorConfig;
use crate::exec::CommandRunner;
use crate::job::{canonical_command_line, command_id, JobInfo};
use crate::state::ErrorReason;

/// Any failure surfaced by the orchestrator
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    JobCreation(#[from] JobCreationError),

    #[error(transparent)]
    Mount(#[from] MountError),

    #[error(transparent)]
    ResultProcessing(#[from] ResultProcessingError),
}

impl OrchestratorError {
    /// Request-level reason of the failure.
    pub fn reason(&self) -> ErrorReason {
        match self {
            OrchestratorError::JobCreation(e) => e.reason().unwrap_or(ErrorReason::UnknownReason),
            OrchestratorError::Mount(_) => ErrorReason::InvalidResource,
            OrchestratorError::ResultProcessing(_) => ErrorReason::ResultProcessingError,
        }
    }
}

/// What happened to one command during job creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreationOutcome {
    /// Jobs were created.
    Created { job_ids: Vec<String> },
    /// No job was needed.
    Skipped { message: String },
    /// Creation failed.
    Failed { reason: ErrorReason, message: String },
}

/// Job creation outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub command_id: String,
    pub command_line: String,
    pub outcome: CreationOutcome,
}

/// Result of a job creation phase.
#[derive(Debug, Clone, Default)]
pub struct JobCreation {
    /// Created jobs, tagged with their owning command, in command order
    pub jobs: Vec<JobInfo>,
    /// One entry per command that was attempted
    pub outcomes: Vec<CommandOutcome>,
    /// Whether a failure stopped the phase early
    pub aborted: bool,
}

impl JobCreation {
    /// The first non-skippable failure, if any.
    pub fn first_failure(&self) -> Option<(&CommandOutcome, ErrorReason, &str)> {
        self.outcomes.iter().find_map(|o| match &o.outcome {
            CreationOutcome::Failed { reason, message } => Some((o, *reason, message.as_str())),
            _ => None,
        })
    }
}

/// Result of processing one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// The processor produced a summary.
    Summary(ResultSummary),
    /// The command ran but left no usable result.
    NoResult,
    /// No job of the command exists.
    NotRun,
}

/// Results of a session, per command.
#[derive(Debug, Clone, Default)]
pub struct ResultsReport {
    pub commands: Vec<(String, CommandResult)>,
    /// Retry contexts keyed by command id
    pub test_contexts: BTreeMap<String, TestContext>,
}

/// Per-session job orchestrator
pub struct JobOrchestrator {
    session_id: String,
    config: OrchestratorConfig,
    job_creator: Arc<dyn JobCreator>,
    result_processor: Arc<dyn ResultProcessor>,
    mounter: ResourceMounter,
    command_jobs: BTreeMap<String, Vec<String>>,
    job_commands: HashMap<String, String>,
    request_infos: HashMap<String, SessionRequestInfo>,
}

impl JobOrchestrator {
    pub fn new(
        session_id: impl Into<String>,
        config: OrchestratorConfig,
        job_creator: Arc<dyn JobCreator>,
        result_processor: Arc<dyn ResultProcessor>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let mounter = ResourceMounter::new(runner, &config);
        Self {
            session_id: session_id.into(),
            config,
            job_creator,
            result_processor,
            mounter,
            command_jobs: BTreeMap::new(),
            job_commands: HashMap::new(),
            request_infos: HashMap::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Create the primary job of every command, in command order.
    ///
    /// The first non-skippable failure stops the phase: later commands are
    /// not attempted.
    pub fn create_primary_jobs(&mut self, request: &NewMultiCommandRequest) -> JobCreation {
        let mut creation = JobCreation::default();

        for info in &request.commands {
            let key = command_id(request, info);
            let result = self
                .request_info(request, info)
                .and_then(|ri| self.job_creator.create_primary_job(&ri));

            let outcome = match result {
                Ok(Some(mut job)) => {
                    job.tag_primary(&key);
                    self.record_job(&key, &job.id);
                    tracing::info!(job_id = %job.id, command_id = %key, "created primary job");
                    let job_ids = vec![job.id.clone()];
                    creation.jobs.push(job);
                    CreationOutcome::Created { job_ids }
                }
                Ok(None) => CreationOutcome::Skipped {
                    message: "no primary job needed".to_string(),
                },
                Err(e) => match e.reason() {
                    None => CreationOutcome::Skipped {
                        message: e.message().to_string(),
                    },
                    Some(reason) => {
                        tracing::warn!(command_id = %key, error = %e, "primary job creation failed");
                        creation.aborted = true;
                        CreationOutcome::Failed {
                            reason,
                            message: e.message().to_string(),
                        }
                    }
                },
            };

            creation.outcomes.push(CommandOutcome {
                command_id: key,
                command_line: info.command_line.clone(),
                outcome,
            });
            if creation.aborted {
                break;
            }
        }
        creation
    }

    /// Create the fan-out jobs of every command. Failures are isolated to
    /// their command.
    pub fn create_secondary_jobs(&mut self, request: &NewMultiCommandRequest) -> JobCreation {
        let mut creation = JobCreation::default();

        for info in &request.commands {
            let key = command_id(request, info);
            let result = self
                .request_info(request, info)
                .and_then(|ri| self.job_creator.create_secondary_jobs(&ri));

            let outcome = match result {
                Ok(jobs) if jobs.is_empty() => CreationOutcome::Skipped {
                    message: "no secondary job needed".to_string(),
                },
                Ok(jobs) => {
                    let mut job_ids = Vec::with_capacity(jobs.len());
                    for mut job in jobs {
                        job.tag_command(&key);
                        self.record_job(&key, &job.id);
                        job_ids.push(job.id.clone());
                        creation.jobs.push(job);
                    }
                    tracing::info!(command_id = %key, count = job_ids.len(), "created secondary jobs");
                    CreationOutcome::Created { job_ids }
                }
                Err(e) => match e.reason() {
                    None => CreationOutcome::Skipped {
                        message: e.message().to_string(),
                    },
                    Some(reason) => {
                        tracing::warn!(command_id = %key, error = %e, "secondary job creation failed");
                        CreationOutcome::Failed {
                            reason,
                            message: e.message().to_string(),
                        }
                    }
                },
            };

            creation.outcomes.push(CommandOutcome {
                command_id: key,
                command_line: info.command_line.clone(),
                outcome,
            });
        }
        creation
    }

    /// Command owning `job_id`, from the in-memory index.
    pub fn resolve_command_id_of_job(&self, job_id: &str) -> Option<String> {
        self.job_commands.get(job_id).cloned()
    }

    /// Command owning `job`: the job's own tag first, then the index.
    pub fn command_id_of(&self, job: &JobInfo) -> Option<String> {
        job.command_id_property()
            .map(str::to_string)
            .or_else(|| self.resolve_command_id_of_job(&job.id))
    }

    /// Jobs recorded for `command_id`.
    pub fn jobs_of_command(&self, command_id: &str) -> &[String] {
        self.command_jobs
            .get(command_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Process the results of every command.
    ///
    /// Only one pass runs per process at a time.
    pub fn process_results(
        &mut self,
        request: &NewMultiCommandRequest,
        jobs: &[JobInfo],
    ) -> Result<ResultsReport, OrchestratorError> {
        let _guard = lock_result_processing();
        let mut report = ResultsReport::default();

        let grouped: Vec<(String, &CommandInfo, Vec<JobInfo>)> = request
            .commands
            .iter()
            .map(|info| {
                let id = command_id(request, info);
                let command_jobs = jobs
                    .iter()
                    .filter(|j| self.command_id_of(j).as_deref() == Some(id.as_str()))
                    .cloned()
                    .collect();
                (id, info, command_jobs)
            })
            .collect();
        if grouped.iter().all(|(_, _, command_jobs)| command_jobs.is_empty()) {
            tracing::debug!("no jobs ran, nothing to process");
            report.commands = grouped
                .into_iter()
                .map(|(id, _, _)| (id, CommandResult::NotRun))
                .collect();
            return Ok(report);
        }

        let root = output_root(&request.test_environment.output_file_upload_url)?;
        for (id, info, command_jobs) in grouped {
            if command_jobs.is_empty() {
                report.commands.push((id, CommandResult::NotRun));
                continue;
            }

            let command_dir = command_output_dir(&root, &self.session_id, &id);
            let (result, context) =
                self.process_command(request, info, &id, &command_dir, &command_jobs)?;
            if let Some(context) = context {
                report.test_contexts.insert(id.clone(), context);
            }
            report.commands.push((id, result));
        }
        Ok(report)
    }

    fn process_command(
        &mut self,
        request: &NewMultiCommandRequest,
        info: &CommandInfo,
        id: &str,
        command_dir: &std::path::Path,
        jobs: &[JobInfo],
    ) -> Result<(CommandResult, Option<TestContext>), ResultProcessingError> {
        let fresh = create_fresh_dir(command_dir)?;
        let result_dir = fresh.join(&self.config.results.dir_name);
        let logs_dir = fresh.join(&self.config.results.logs_dir_name);
        for dir in [&result_dir, &logs_dir] {
            fs::create_dir_all(dir).map_err(|e| ResultProcessingError::io(dir, e))?;
        }

        if let Some(previous) = &request.retry_previous_session_id {
            let root = output_root(&request.test_environment.output_file_upload_url)?;
            let previous_dir =
                command_output_dir(&root, previous, id).join(&self.config.results.dir_name);
            let copied = copy_retry_files(&previous_dir, &result_dir)?;
            tracing::debug!(command_id = %id, copied, "carried forward previous results");
        }

        let summary = self.result_processor.process(&ResultContext {
            session_id: &self.session_id,
            command_id: id,
            jobs,
            result_dir: &result_dir,
            logs_dir: &logs_dir,
            request_info: self.request_infos.get(id),
        })?;

        // Artifact location once the fresh dir has been merged up.
        let artifact = summary
            .as_ref()
            .and_then(|s| s.result_artifact.as_ref())
            .filter(|p| p.exists())
            .map(|p| match p.strip_prefix(&fresh) {
                Ok(relative) => command_dir.join(relative),
                Err(_) => p.clone(),
            });

        merge_up(&fresh)?;

        let context = artifact.map(|path| self.test_context(request, info, path));
        let result = match summary {
            Some(summary) => CommandResult::Summary(summary),
            None => CommandResult::NoResult,
        };
        Ok((result, context))
    }

    fn test_context(
        &self,
        request: &NewMultiCommandRequest,
        info: &CommandInfo,
        artifact: PathBuf,
    ) -> TestContext {
        let name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        TestContext {
            command_line: canonical_command_line(request, info).to_string(),
            env_vars: request.test_environment.env_vars.clone(),
            test_resources: vec![TestResource {
                name,
                url: format!("{}{}", FILE_URL_PREFIX, artifact.display()),
            }],
        }
    }

    /// Remove scratch directories and unmount the session archive.
    ///
    /// A session resumed after a restart never mounted in this process, so
    /// the archive mount point of `request` is adopted when it exists.
    /// Best-effort: failures are logged and skipped.
    pub fn cleanup(&mut self, request: &NewMultiCommandRequest, jobs: &[JobInfo]) {
        for dir in jobs.iter().filter_map(|j| j.gen_file_dir.as_ref()) {
            if let Err(e) = fs::remove_dir_all(dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(dir = %dir.display(), error = %e, "failed to remove job gen dir");
                }
            }
        }

        if self.mounter.mount_point().is_none() {
            if let Some(archive) = find_xts_archive(request) {
                let mount_point = xts_mount_point(&self.config, &self.session_id, &archive);
                self.mounter.adopt(&mount_point);
            }
        }
        if let Err(e) = self.mounter.unmount() {
            tracing::warn!(error = %e, "failed to unmount session archive");
        }

        let session_dir = self.config.session_gen_dir(&self.session_id);
        if session_dir.exists() {
            if let Err(e) = fs::remove_dir_all(&session_dir) {
                tracing::warn!(dir = %session_dir.display(), error = %e, "failed to remove session gen dir");
            }
        }
    }

    /// Validated parameters of `info`, derived once per command id.
    fn request_info(
        &mut self,
        request: &NewMultiCommandRequest,
        info: &CommandInfo,
    ) -> Result<SessionRequestInfo, JobCreationError> {
        let id = command_id(request, info);
        if let Some(cached) = self.request_infos.get(&id) {
            return Ok(cached.clone());
        }
        let derived = SessionRequestInfo::derive(
            &self.session_id,
            request,
            info,
            &self.config,
            &mut self.mounter,
        )?;
        self.request_infos.insert(id, derived.clone());
        Ok(derived)
    }

    fn record_job(&mut self, command_id: &str, job_id: &str) {
        let jobs = self.command_jobs.entry(command_id.to_string()).or_default();
        if !jobs.iter().any(|j| j == job_id) {
            jobs.push(job_id.to_string());
        }
        self.job_commands
            .insert(job_id.to_string(), command_id.to_string());
    }
}
