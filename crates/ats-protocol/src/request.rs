//! Multi-command test request payload.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ProtocolError;

/// A request to run one or more xTS commands in a single session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewMultiCommandRequest {
    /// Commands to run, in submission order.
    #[serde(default)]
    pub commands: Vec<CommandInfo>,

    /// Named test resources (suite archives, extra files).
    #[serde(default)]
    pub test_resources: Vec<TestResource>,

    /// Environment shared by every command.
    #[serde(default)]
    pub test_environment: TestEnvironment,

    /// Remaining automatic retries when tests fail.
    #[serde(default)]
    pub max_retry_on_test_failures: u32,

    /// Session id of the attempt this request retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_previous_session_id: Option<String>,

    /// Test run id of the attempt this request retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_test_run_id: Option<String>,

    /// Context carried forward from the previous attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_test_context: Option<TestContext>,
}

impl NewMultiCommandRequest {
    /// Whether this request is itself a retry of an earlier attempt.
    pub fn is_retry(&self) -> bool {
        self.retry_previous_session_id.is_some() || self.prev_test_context.is_some()
    }

    /// Check that every command carries a command line.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self
            .commands
            .iter()
            .any(|c| c.command_line.trim().is_empty())
        {
            return Err(ProtocolError::MissingField("commands[].command_line"));
        }
        Ok(())
    }
}

/// One command of a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandInfo {
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The xTS command line, e.g. `cts -m CtsGestureTestCases`.
    pub command_line: String,

    /// Device selection dimensions; a key may repeat (e.g. several `device_serial`).
    #[serde(default)]
    pub device_dimensions: Vec<DeviceDimension>,

    /// Number of shards requested for this command.
    #[serde(default)]
    pub shard_count: u32,

    /// How shards are formed.
    #[serde(default)]
    pub sharding_mode: ShardingMode,

    /// Device actions applied before the test.
    #[serde(default)]
    pub device_action_config_objects: Vec<DeviceActionConfigObject>,
}

impl CommandInfo {
    /// Values of every dimension named `name`.
    pub fn dimension_values(&self, name: &str) -> Vec<String> {
        self.device_dimensions
            .iter()
            .filter(|d| d.name == name)
            .map(|d| d.value.clone())
            .collect()
    }
}

/// A single device selection dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDimension {
    pub name: String,
    pub value: String,
}

/// Sharding mode of a command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShardingMode {
    /// Shards run inside one invocation.
    #[default]
    Runner,
    /// Each module becomes its own shard.
    Module,
}

/// Configuration for a device action (installs, settings, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceActionConfigObject {
    /// Kind of object, e.g. `TARGET_PREPARER`.
    #[serde(default)]
    pub kind: String,
    /// Implementation class name.
    pub class_name: String,
    /// Options passed to the action.
    #[serde(default)]
    pub option_values: Vec<OptionValue>,
}

/// A named multi-valued option.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionValue {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// A named test resource. Only `file://` URLs are resolved locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResource {
    pub name: String,
    pub url: String,
}

/// Environment shared by every command of a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestEnvironment {
    /// Environment variables for the test process.
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,

    /// Scripts run before the test.
    #[serde(default)]
    pub setup_scripts: Vec<String>,

    /// Where results are written; only `file://` is supported.
    #[serde(default)]
    pub output_file_upload_url: String,

    /// File patterns collected as outputs.
    #[serde(default)]
    pub output_file_patterns: Vec<String>,

    /// Overall invocation timeout in milliseconds (0 = runtime default).
    #[serde(default)]
    pub invocation_timeout_ms: u64,

    /// Output idle timeout in milliseconds (0 = runtime default).
    #[serde(default)]
    pub output_idle_timeout_ms: u64,

    /// Report through a subprocess reporter.
    #[serde(default)]
    pub use_subprocess_reporting: bool,

    /// Run device setup in parallel.
    #[serde(default)]
    pub use_parallel_setup: bool,
}

/// State carried forward so a retry can resume from partial results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestContext {
    /// Command line of the original (not retried) command.
    pub command_line: String,

    /// Environment variables of the attempt.
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,

    /// Retained result artifacts.
    #[serde(default)]
    pub test_resources: Vec<TestResource>,
}
