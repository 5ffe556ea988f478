//! Validated per-command parameters

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ats_protocol::{
    local_path_of, CommandInfo, DeviceActionConfigObject, NewMultiCommandRequest, ShardingMode,
};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use super::collaborators::JobCreationError;
use super::mount::ResourceMounter;
use crate::config::OrchestratorConfig;
use crate::job::command_id;

/// Test resource name of an xTS suite archive, e.g. `android-cts.zip`.
const XTS_ARCHIVE_PATTERN: &str = r"^android-[a-z]+\.zip$";

/// Dimension selecting a device by serial.
const DEVICE_SERIAL_DIMENSION: &str = "device_serial";

/// Everything a job creator needs to know about one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequestInfo {
    pub command_id: String,
    pub command_line: String,
    pub test_plan: String,
    pub xts_type: String,
    /// Mount point of the suite archive
    pub xts_root_dir: PathBuf,
    pub archive_path: PathBuf,
    pub device_serials: Vec<String>,
    pub shard_count: u32,
    pub sharding_mode: ShardingMode,
    pub module_names: Vec<String>,
    pub test_name: Option<String>,
    pub include_filters: Vec<String>,
    pub exclude_filters: Vec<String>,
    pub extra_args: Vec<String>,
    pub env_vars: BTreeMap<String, String>,
    pub device_actions: Vec<DeviceActionConfigObject>,
    /// Session being retried, if any
    pub retry_session_id: Option<String>,
    /// Output location of the attempt being retried
    pub retry_result_dir: Option<PathBuf>,
}

impl SessionRequestInfo {
    /// Validate `info` and mount the suite archive it needs.
    pub fn derive(
        session_id: &str,
        request: &NewMultiCommandRequest,
        info: &CommandInfo,
        config: &OrchestratorConfig,
        mounter: &mut ResourceMounter,
    ) -> Result<Self, JobCreationError> {
        let parsed = ats_cmdline::parse(&info.command_line).map_err(|e| {
            JobCreationError::InvalidRequest(format!(
                "cannot parse command line {:?}: {}",
                info.command_line, e
            ))
        })?;

        let archive_path = find_xts_archive(request).ok_or_else(|| {
            JobCreationError::InvalidRequest(format!(
                "COMMAND_NOT_AVAILABLE: no android xts zip among test resources {:?}",
                request
                    .test_resources
                    .iter()
                    .map(|r| r.name.as_str())
                    .collect::<Vec<_>>()
            ))
        })?;

        let xts_root_dir = xts_mount_point(config, session_id, &archive_path);
        mounter
            .mount(&archive_path, &xts_root_dir)
            .map_err(|e| JobCreationError::InvalidResource(e.to_string()))?;

        let id = command_id(request, info);
        let shard_count = if info.shard_count > 0 {
            info.shard_count
        } else {
            parsed.shard_count.unwrap_or(0)
        };

        Ok(Self {
            retry_result_dir: previous_output_dir(request, &id),
            command_id: id,
            command_line: info.command_line.clone(),
            test_plan: parsed.test_plan,
            xts_type: parsed.xts_type,
            xts_root_dir,
            archive_path,
            device_serials: info.dimension_values(DEVICE_SERIAL_DIMENSION),
            shard_count,
            sharding_mode: info.sharding_mode,
            module_names: parsed.modules,
            test_name: parsed.test_name,
            include_filters: parsed.include_filters,
            exclude_filters: parsed.exclude_filters,
            extra_args: parsed.extra_args,
            env_vars: request.test_environment.env_vars.clone(),
            device_actions: info.device_action_config_objects.clone(),
            retry_session_id: request.retry_previous_session_id.clone(),
        })
    }
}

/// First `file://` test resource named like an xTS archive.
pub fn find_xts_archive(request: &NewMultiCommandRequest) -> Option<PathBuf> {
    let pattern = Regex::new(XTS_ARCHIVE_PATTERN).ok()?;
    request
        .test_resources
        .iter()
        .filter(|r| pattern.is_match(&r.name))
        .find_map(|r| local_path_of(&r.url))
        .map(PathBuf::from)
}

/// Where the archive of session `session_id` is mounted.
pub fn xts_mount_point(config: &OrchestratorConfig, session_id: &str, archive: &Path) -> PathBuf {
    config.session_gen_dir(session_id).join(archive_stem(archive))
}

fn archive_stem(archive: &Path) -> String {
    archive
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "xts".to_string())
}

/// `<output>/<previous session>/<command id>` for a retry with a local output.
fn previous_output_dir(request: &NewMultiCommandRequest, command_id: &str) -> Option<PathBuf> {
    let previous = request.retry_previous_session_id.as_deref()?;
    let root = local_path_of(&request.test_environment.output_file_upload_url)?;
    Some(Path::new(root).join(previous).join(command_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandRunner;
    use crate::mock::MockCommandRunner;
    use ats_protocol::{DeviceDimension, TestResource};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (OrchestratorConfig, Arc<MockCommandRunner>, ResourceMounter) {
        let config = OrchestratorConfig {
            gen_dir: dir.path().join("gen"),
            ..Default::default()
        };
        let runner = Arc::new(MockCommandRunner::new());
        let dyn_runner: Arc<dyn CommandRunner> = runner.clone();
        let mounter = ResourceMounter::new(dyn_runner, &config);
        (config, runner, mounter)
    }

    fn request(resources: Vec<TestResource>) -> NewMultiCommandRequest {
        NewMultiCommandRequest {
            commands: vec![CommandInfo {
                command_line: "cts -m CtsGestureTestCases --shard-count 2".to_string(),
                device_dimensions: vec![
                    DeviceDimension {
                        name: "device_serial".to_string(),
                        value: "SERIAL_A".to_string(),
                    },
                    DeviceDimension {
                        name: "device_serial".to_string(),
                        value: "SERIAL_B".to_string(),
                    },
                ],
                ..Default::default()
            }],
            test_resources: resources,
            ..Default::default()
        }
    }

    fn cts_zip() -> TestResource {
        TestResource {
            name: "android-cts.zip".to_string(),
            url: "file:///data/suites/android-cts.zip".to_string(),
        }
    }

    #[test]
    fn test_derive_full() {
        let dir = TempDir::new().unwrap();
        let (config, runner, mut mounter) = setup(&dir);
        let request = request(vec![
            TestResource {
                name: "extra.apk".to_string(),
                url: "file:///data/extra.apk".to_string(),
            },
            cts_zip(),
        ]);

        let info =
            SessionRequestInfo::derive("s1", &request, &request.commands[0], &config, &mut mounter)
                .unwrap();

        assert_eq!(info.test_plan, "cts");
        assert_eq!(info.xts_type, "cts");
        assert_eq!(info.module_names, vec!["CtsGestureTestCases"]);
        assert_eq!(info.shard_count, 2);
        assert_eq!(info.device_serials, vec!["SERIAL_A", "SERIAL_B"]);
        assert_eq!(info.archive_path, PathBuf::from("/data/suites/android-cts.zip"));
        assert_eq!(
            info.xts_root_dir,
            dir.path().join("gen").join("session_s1").join("android-cts")
        );
        assert_eq!(runner.calls().len(), 1);
        assert!(info.retry_result_dir.is_none());
    }

    #[test]
    fn test_missing_archive_is_command_not_available() {
        let dir = TempDir::new().unwrap();
        let (config, runner, mut mounter) = setup(&dir);
        let request = request(Vec::new());

        let err =
            SessionRequestInfo::derive("s1", &request, &request.commands[0], &config, &mut mounter)
                .unwrap_err();
        assert!(matches!(err, JobCreationError::InvalidRequest(_)));
        assert!(err.message().starts_with("COMMAND_NOT_AVAILABLE"));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_non_file_archive_ignored() {
        let remote = request(vec![TestResource {
            name: "android-cts.zip".to_string(),
            url: "gs://bucket/android-cts.zip".to_string(),
        }]);
        assert!(find_xts_archive(&remote).is_none());

        let misnamed = request(vec![TestResource {
            name: "android-cts.zip.bak".to_string(),
            url: "file:///data/android-cts.zip.bak".to_string(),
        }]);
        assert!(find_xts_archive(&misnamed).is_none());
    }

    #[test]
    fn test_unparseable_command_line() {
        let dir = TempDir::new().unwrap();
        let (config, _runner, mut mounter) = setup(&dir);
        let mut request = request(vec![cts_zip()]);
        request.commands[0].command_line = "cts -m \"unterminated".to_string();

        let err =
            SessionRequestInfo::derive("s1", &request, &request.commands[0], &config, &mut mounter)
                .unwrap_err();
        assert!(matches!(err, JobCreationError::InvalidRequest(_)));
    }

    #[test]
    fn test_mount_failure_is_invalid_resource() {
        let dir = TempDir::new().unwrap();
        let (config, runner, mut mounter) = setup(&dir);
        runner.fail_program("fuse-zip", "zip archive is corrupt");
        let request = request(vec![cts_zip()]);

        let err =
            SessionRequestInfo::derive("s1", &request, &request.commands[0], &config, &mut mounter)
                .unwrap_err();
        assert!(matches!(err, JobCreationError::InvalidResource(_)));
    }

    #[test]
    fn test_retry_linkage() {
        let dir = TempDir::new().unwrap();
        let (config, _runner, mut mounter) = setup(&dir);
        let mut request = request(vec![cts_zip()]);
        request.retry_previous_session_id = Some("s0".to_string());
        request.test_environment.output_file_upload_url = "file:///out".to_string();

        let info =
            SessionRequestInfo::derive("s1", &request, &request.commands[0], &config, &mut mounter)
                .unwrap();
        assert_eq!(info.retry_session_id.as_deref(), Some("s0"));
        assert_eq!(
            info.retry_result_dir,
            Some(Path::new("/out").join("s0").join(&info.command_id))
        );
    }
}
