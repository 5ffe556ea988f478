//! Job descriptors exchanged with the session runtime
//!
//! A job is one unit of execution dispatched to the fleet scheduler. Jobs
//! whose driver is [`PRIMARY_DRIVER`] run serially; every other job is a
//! secondary job fanned out once the primary phase has finished.

mod command_id;

pub use command_id::{canonical_command_line, command_id, command_id_of_line};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Driver name of primary (tradefed-like) jobs.
pub const PRIMARY_DRIVER: &str = "XtsTradefedTest";

/// Property tagging a primary job. Value is `"true"`.
pub const PRIMARY_JOB_PROPERTY: &str = "xts-tradefed-job";

/// Property carrying the id of the command that owns a job.
pub const COMMAND_ID_PROPERTY: &str = "ats-command-id";

/// Test property: passed tests reported by a primary job.
pub const TRADEFED_TESTS_PASSED: &str = "tradefed_tests_passed";

/// Test property: failed tests reported by a primary job.
pub const TRADEFED_TESTS_FAILED: &str = "tradefed_tests_failed";

/// Test property: passed tests reported by a secondary job.
pub const MOBLY_TESTS_PASSED: &str = "mobly_tests_passed";

/// Test property: failed and errored tests reported by a secondary job.
pub const MOBLY_TESTS_FAILED_AND_ERROR: &str = "mobly_tests_failed_and_error";

/// Sub-device dimension holding the device serial.
pub const DEVICE_UUID_DIMENSION: &str = "uuid";

/// Status of a job or test, as reported by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    New,
    Assigned,
    Running,
    Done,
    Suspended,
}

impl JobStatus {
    /// Whether the job will not run any further.
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Suspended)
    }
}

/// Result of a job or test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestResult {
    #[default]
    Unknown,
    Pass,
    Fail,
    Error,
    Timeout,
    Abort,
    Skip,
}

/// Timing of a test execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modify_time: Option<DateTime<Utc>>,
}

/// One test execution inside a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestInfo {
    pub id: String,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub result: TestResult,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl TestInfo {
    /// Read a numeric test property. Unparseable values count as absent.
    pub fn count_property(&self, key: &str) -> Option<u64> {
        self.properties.get(key).and_then(|v| v.trim().parse().ok())
    }
}

/// A job in the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    /// Locator id, unique within the session.
    pub id: String,

    pub name: String,

    /// Driver kind; [`PRIMARY_DRIVER`] marks a primary job.
    pub driver: String,

    #[serde(default)]
    pub status: JobStatus,

    #[serde(default)]
    pub result: TestResult,

    #[serde(default)]
    pub tests: Vec<TestInfo>,

    /// Arbitrary string properties (primary tag, owning command).
    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    /// Dimensions of each sub-device the job runs on.
    #[serde(default)]
    pub sub_device_dimensions: Vec<BTreeMap<String, String>>,

    /// Scratch directory generated for the job, removed at cleanup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gen_file_dir: Option<PathBuf>,
}

impl JobInfo {
    /// Create a job with a fresh ULID locator.
    pub fn new(name: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            name: name.into(),
            driver: driver.into(),
            ..Default::default()
        }
    }

    /// Whether the driver marks this as a primary job.
    pub fn is_primary_driver(&self) -> bool {
        self.driver == PRIMARY_DRIVER
    }

    /// Whether this job carries the primary tag.
    pub fn is_tagged_primary(&self) -> bool {
        self.properties
            .get(PRIMARY_JOB_PROPERTY)
            .is_some_and(|v| v == "true")
    }

    /// Whether this job runs in the primary phase. The tag decides, and the
    /// driver stands in for jobs submitted without it.
    pub fn is_primary(&self) -> bool {
        self.is_tagged_primary() || self.is_primary_driver()
    }

    /// Owning command id recorded on the job, if any.
    pub fn command_id_property(&self) -> Option<&str> {
        self.properties.get(COMMAND_ID_PROPERTY).map(String::as_str)
    }

    /// Tag the job as primary and owned by `command_id`.
    pub fn tag_primary(&mut self, command_id: &str) {
        self.properties
            .insert(PRIMARY_JOB_PROPERTY.to_string(), "true".to_string());
        self.tag_command(command_id);
    }

    pub fn tag_command(&mut self, command_id: &str) {
        self.properties
            .insert(COMMAND_ID_PROPERTY.to_string(), command_id.to_string());
    }

    /// Serials of every sub-device that declares one.
    pub fn device_serials(&self) -> Vec<String> {
        self.sub_device_dimensions
            .iter()
            .filter_map(|dims| dims.get(DEVICE_UUID_DIMENSION).cloned())
            .collect()
    }

    pub fn test(&self, test_id: &str) -> Option<&TestInfo> {
        self.tests.iter().find(|t| t.id == test_id)
    }

    /// Ids of tests currently in the running status.
    pub fn running_test_ids(&self) -> Vec<String> {
        self.tests
            .iter()
            .filter(|t| t.status == JobStatus::Running)
            .map(|t| t.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_has_unique_id() {
        let a = JobInfo::new("a", PRIMARY_DRIVER);
        let b = JobInfo::new("b", "MoblyTest");
        assert_ne!(a.id, b.id);
        assert!(a.is_primary_driver());
        assert!(!b.is_primary_driver());
    }

    #[test]
    fn test_tag_primary() {
        let mut job = JobInfo::new("job", PRIMARY_DRIVER);
        assert!(!job.is_tagged_primary());
        job.tag_primary("cmd-1");
        assert!(job.is_tagged_primary());
        assert_eq!(job.command_id_property(), Some("cmd-1"));
    }

    #[test]
    fn test_untagged_primary_driver_is_primary() {
        assert!(JobInfo::new("job", PRIMARY_DRIVER).is_primary());
        assert!(!JobInfo::new("job", "MoblyTest").is_primary());

        let mut tagged = JobInfo::new("job", "MoblyTest");
        tagged.tag_primary("cmd-1");
        assert!(tagged.is_primary());
    }

    #[test]
    fn test_device_serials_from_uuid_dimension() {
        let mut job = JobInfo::new("job", PRIMARY_DRIVER);
        job.sub_device_dimensions = vec![
            BTreeMap::from([("uuid".to_string(), "SERIAL_A".to_string())]),
            BTreeMap::from([("model".to_string(), "pixel".to_string())]),
            BTreeMap::from([("uuid".to_string(), "SERIAL_B".to_string())]),
        ];
        assert_eq!(job.device_serials(), vec!["SERIAL_A", "SERIAL_B"]);
    }

    #[test]
    fn test_count_property() {
        let test = TestInfo {
            id: "t".to_string(),
            properties: BTreeMap::from([
                (TRADEFED_TESTS_PASSED.to_string(), "12".to_string()),
                (TRADEFED_TESTS_FAILED.to_string(), "n/a".to_string()),
            ]),
            ..Default::default()
        };
        assert_eq!(test.count_property(TRADEFED_TESTS_PASSED), Some(12));
        assert_eq!(test.count_property(TRADEFED_TESTS_FAILED), None);
        assert_eq!(test.count_property(MOBLY_TESTS_PASSED), None);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&JobStatus::Suspended).unwrap();
        assert_eq!(json, "\"SUSPENDED\"");
        assert!(JobStatus::Done.is_finished());
        assert!(!JobStatus::Assigned.is_finished());
    }
}
