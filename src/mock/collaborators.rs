//! Mock job creator and result processor

use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Mutex;

use super::lock;
use crate::job::{
    JobInfo, JobStatus, MOBLY_TESTS_FAILED_AND_ERROR, MOBLY_TESTS_PASSED, PRIMARY_DRIVER,
    TRADEFED_TESTS_FAILED, TRADEFED_TESTS_PASSED,
};
use crate::orchestrator::{
    JobCreationError, JobCreator, ResultContext, ResultProcessingError, ResultProcessor,
    ResultSummary, SessionRequestInfo,
};

/// Driver of secondary jobs created by the mock.
const SECONDARY_DRIVER: &str = "MoblyAospPackageTest";

/// File written into the result directory when artifacts are enabled.
pub const MOCK_ARTIFACT_NAME: &str = "results.zip";

/// Report written into every processed result directory.
const RESULT_REPORT_NAME: &str = "test_result.xml";

#[derive(Debug, Clone)]
enum PrimaryBehavior {
    Skip,
    Fail(JobCreationError),
}

/// Creates one primary job per command unless told otherwise.
#[derive(Debug, Default)]
pub struct MockJobCreator {
    primary: Mutex<HashMap<String, PrimaryBehavior>>,
    secondary_counts: Mutex<HashMap<String, usize>>,
    secondary_failures: Mutex<HashMap<String, JobCreationError>>,
    primary_calls: Mutex<Vec<String>>,
    secondary_calls: Mutex<Vec<String>>,
}

impl MockJobCreator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create no primary job for `command_line`.
    pub fn skip_primary(&self, command_line: &str) {
        lock(&self.primary).insert(command_line.to_string(), PrimaryBehavior::Skip);
    }

    pub fn fail_primary(&self, command_line: &str, error: JobCreationError) {
        lock(&self.primary).insert(command_line.to_string(), PrimaryBehavior::Fail(error));
    }

    /// Create `count` secondary jobs for `command_line`.
    pub fn secondary_jobs_for(&self, command_line: &str, count: usize) {
        lock(&self.secondary_counts).insert(command_line.to_string(), count);
    }

    pub fn fail_secondary(&self, command_line: &str, error: JobCreationError) {
        lock(&self.secondary_failures).insert(command_line.to_string(), error);
    }

    /// Command lines passed to `create_primary_job`, in call order.
    pub fn primary_calls(&self) -> Vec<String> {
        lock(&self.primary_calls).clone()
    }

    pub fn secondary_calls(&self) -> Vec<String> {
        lock(&self.secondary_calls).clone()
    }
}

impl JobCreator for MockJobCreator {
    fn create_primary_job(
        &self,
        info: &SessionRequestInfo,
    ) -> Result<Option<JobInfo>, JobCreationError> {
        lock(&self.primary_calls).push(info.command_line.clone());
        match lock(&self.primary).get(&info.command_line) {
            Some(PrimaryBehavior::Skip) => Ok(None),
            Some(PrimaryBehavior::Fail(e)) => Err(e.clone()),
            None => Ok(Some(JobInfo::new(
                format!("{} {}", info.xts_type, info.module_names.join(",")),
                PRIMARY_DRIVER,
            ))),
        }
    }

    fn create_secondary_jobs(
        &self,
        info: &SessionRequestInfo,
    ) -> Result<Vec<JobInfo>, JobCreationError> {
        lock(&self.secondary_calls).push(info.command_line.clone());
        if let Some(e) = lock(&self.secondary_failures).get(&info.command_line) {
            return Err(e.clone());
        }
        let count = lock(&self.secondary_counts)
            .get(&info.command_line)
            .copied()
            .unwrap_or(0);
        Ok((0..count)
            .map(|i| JobInfo::new(format!("{} mobly-{}", info.xts_type, i), SECONDARY_DRIVER))
            .collect())
    }
}

/// Sums test counters reported on each job's tests.
#[derive(Debug, Default)]
pub struct MockResultProcessor {
    write_artifact: Mutex<bool>,
    no_result: Mutex<HashSet<String>>,
    failures: Mutex<HashMap<String, String>>,
    observed_files: Mutex<HashMap<String, Vec<String>>>,
}

impl MockResultProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write [`MOCK_ARTIFACT_NAME`] and report it as the result artifact.
    pub fn write_artifact(&self, enabled: bool) {
        *lock(&self.write_artifact) = enabled;
    }

    /// Report no usable result for `command_id`.
    pub fn no_result_for(&self, command_id: &str) {
        lock(&self.no_result).insert(command_id.to_string());
    }

    pub fn fail_for(&self, command_id: &str, message: &str) {
        lock(&self.failures).insert(command_id.to_string(), message.to_string());
    }

    /// Names present in the result directory of `command_id` before
    /// processing, sorted.
    pub fn observed_files(&self, command_id: &str) -> Vec<String> {
        lock(&self.observed_files)
            .get(command_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl ResultProcessor for MockResultProcessor {
    fn process(
        &self,
        context: &ResultContext<'_>,
    ) -> Result<Option<ResultSummary>, ResultProcessingError> {
        let mut seen: Vec<String> = fs::read_dir(context.result_dir)
            .map_err(|e| ResultProcessingError::io(context.result_dir, e))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        seen.sort();
        lock(&self.observed_files).insert(context.command_id.to_string(), seen);

        if let Some(message) = lock(&self.failures).get(context.command_id) {
            return Err(ResultProcessingError::Parse {
                command_id: context.command_id.to_string(),
                message: message.clone(),
            });
        }
        if lock(&self.no_result).contains(context.command_id) {
            return Ok(None);
        }

        let mut summary = ResultSummary {
            total_module_count: context.jobs.len() as u64,
            ..Default::default()
        };
        for job in context.jobs {
            if job.status == JobStatus::Done {
                summary.done_module_count += 1;
            }
            for test in &job.tests {
                summary.passed_test_count += test
                    .count_property(MOBLY_TESTS_PASSED)
                    .or_else(|| test.count_property(TRADEFED_TESTS_PASSED))
                    .unwrap_or(0);
                summary.failed_test_count += test
                    .count_property(MOBLY_TESTS_FAILED_AND_ERROR)
                    .or_else(|| test.count_property(TRADEFED_TESTS_FAILED))
                    .unwrap_or(0);
            }
        }
        summary.total_test_count = summary.passed_test_count + summary.failed_test_count;

        let report = context.result_dir.join(RESULT_REPORT_NAME);
        fs::write(
            &report,
            format!(
                "<Result passed=\"{}\" failed=\"{}\"/>\n",
                summary.passed_test_count, summary.failed_test_count
            ),
        )
        .map_err(|e| ResultProcessingError::io(&report, e))?;

        if *lock(&self.write_artifact) {
            let artifact = context.result_dir.join(MOCK_ARTIFACT_NAME);
            fs::write(&artifact, b"PK\x05\x06")
                .map_err(|e| ResultProcessingError::io(&artifact, e))?;
            summary.result_artifact = Some(artifact);
        }
        Ok(Some(summary))
    }
}
