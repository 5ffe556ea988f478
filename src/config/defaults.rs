//! Built-in orchestrator defaults (layer 1)
//!
//! The typed settings double as the lowest config layer: their `Default`
//! values are serialized and merged under every other layer.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Settings used by the job orchestrator and the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Root of per-session mount points (`session_<id>/<archive stem>`)
    pub gen_dir: PathBuf,

    /// Scratch space
    pub tmp_dir: PathBuf,

    /// Timeout for mount/unmount tools (default: 600 = 10 minutes)
    pub slow_command_timeout_seconds: u64,

    pub mount: MountConfig,

    pub results: ResultsConfig,

    pub snapshot: SnapshotConfig,
}

/// Archive mount tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Invoked as `<command> -r <zip> <dir>`
    pub command: String,

    /// Invoked as `<unmount_command> -u <dir>`
    pub unmount_command: String,
}

/// Layout of a command's output location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    pub dir_name: String,
    pub logs_dir_name: String,
}

/// Optional on-disk copy of every published snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            gen_dir: PathBuf::from("/tmp/ats/gen"),
            tmp_dir: PathBuf::from("/tmp/ats/tmp"),
            slow_command_timeout_seconds: 600,
            mount: MountConfig::default(),
            results: ResultsConfig::default(),
            snapshot: SnapshotConfig::default(),
        }
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            command: "fuse-zip".to_string(),
            unmount_command: "fusermount".to_string(),
        }
    }
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            dir_name: "results".to_string(),
            logs_dir_name: "logs".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn slow_command_timeout(&self) -> Duration {
        Duration::from_secs(self.slow_command_timeout_seconds)
    }

    /// Directory holding every mount point of a session.
    pub fn session_gen_dir(&self, session_id: &str) -> PathBuf {
        self.gen_dir.join(format!("session_{}", session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.gen_dir, PathBuf::from("/tmp/ats/gen"));
        assert_eq!(config.slow_command_timeout(), Duration::from_secs(600));
        assert_eq!(config.mount.command, "fuse-zip");
        assert_eq!(config.mount.unmount_command, "fusermount");
        assert_eq!(config.results.dir_name, "results");
        assert!(config.snapshot.dir.is_none());
    }

    #[test]
    fn test_to_value_nests_sections() {
        let value = OrchestratorConfig::default().to_value();
        assert_eq!(value["slow_command_timeout_seconds"], 600);
        assert_eq!(value["mount"]["command"], "fuse-zip");
        assert_eq!(value["results"]["logs_dir_name"], "logs");
        assert!(value["snapshot"].get("dir").is_none());
    }

    #[test]
    fn test_partial_value_fills_defaults() {
        let config: OrchestratorConfig =
            serde_json::from_value(serde_json::json!({"mount": {"command": "archivemount"}}))
                .unwrap();
        assert_eq!(config.mount.command, "archivemount");
        assert_eq!(config.mount.unmount_command, "fusermount");
        assert_eq!(config.session_gen_dir("s1"), PathBuf::from("/tmp/ats/gen/session_s1"));
    }
}
