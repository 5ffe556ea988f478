//! Test-resource archive mounting
//!
//! The xTS archive of a session is mounted read-only once and unmounted at
//! most once during cleanup.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::OrchestratorConfig;
use crate::exec::{Cmd, CommandRunner, ExecError};

/// Mount tool output when the target is already populated.
const MOUNTPOINT_NOT_EMPTY: &str = "mountpoint is not empty";

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("cannot prepare mount point {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to mount {archive} into {mount_point}: {source}")]
    Mount {
        archive: PathBuf,
        mount_point: PathBuf,
        #[source]
        source: ExecError,
    },

    #[error("failed to unmount {mount_point}: {source}")]
    Unmount {
        mount_point: PathBuf,
        #[source]
        source: ExecError,
    },
}

/// Mounts one archive per session.
pub struct ResourceMounter {
    runner: Arc<dyn CommandRunner>,
    mount_command: String,
    unmount_command: String,
    timeout: Duration,
    mount_point: Option<PathBuf>,
    unmount_attempted: bool,
}

impl ResourceMounter {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &OrchestratorConfig) -> Self {
        Self {
            runner,
            mount_command: config.mount.command.clone(),
            unmount_command: config.mount.unmount_command.clone(),
            timeout: config.slow_command_timeout(),
            mount_point: None,
            unmount_attempted: false,
        }
    }

    pub fn mount_point(&self) -> Option<&Path> {
        self.mount_point.as_deref()
    }

    /// Mount `archive` at `mount_point`. A second call is a no-op.
    ///
    /// A populated mount point counts as mounted, so a session resumed after
    /// a crash mid-mount proceeds.
    pub fn mount(&mut self, archive: &Path, mount_point: &Path) -> Result<(), MountError> {
        if let Some(existing) = &self.mount_point {
            tracing::debug!(mount_point = %existing.display(), "archive already mounted");
            return Ok(());
        }

        fs::create_dir_all(mount_point).map_err(|source| MountError::Prepare {
            path: mount_point.to_path_buf(),
            source,
        })?;

        let cmd = Cmd::new(
            self.mount_command.clone(),
            [
                "-r".to_string(),
                archive.display().to_string(),
                mount_point.display().to_string(),
            ],
            self.timeout,
        );
        match self.runner.run(&cmd) {
            Ok(_) => {
                tracing::info!(archive = %archive.display(), mount_point = %mount_point.display(), "mounted archive");
            }
            Err(e) if e.output().contains(MOUNTPOINT_NOT_EMPTY) => {
                tracing::info!(mount_point = %mount_point.display(), "mount point already populated");
            }
            Err(source) => {
                return Err(MountError::Mount {
                    archive: archive.to_path_buf(),
                    mount_point: mount_point.to_path_buf(),
                    source,
                });
            }
        }
        self.mount_point = Some(mount_point.to_path_buf());
        Ok(())
    }

    /// Take over a mount point left by an earlier process.
    ///
    /// Only an existing directory is adopted, and never over a mount of this
    /// process.
    pub fn adopt(&mut self, mount_point: &Path) -> bool {
        if self.mount_point.is_some() || !mount_point.is_dir() {
            return false;
        }
        tracing::info!(mount_point = %mount_point.display(), "adopting existing mount point");
        self.mount_point = Some(mount_point.to_path_buf());
        true
    }

    /// Unmount the session's mount point. Returns false when there was
    /// nothing to do or an unmount was already attempted.
    pub fn unmount(&mut self) -> Result<bool, MountError> {
        if self.unmount_attempted {
            return Ok(false);
        }
        let Some(mount_point) = self.mount_point.clone() else {
            return Ok(false);
        };
        self.unmount_attempted = true;

        let cmd = Cmd::new(
            self.unmount_command.clone(),
            ["-u".to_string(), mount_point.display().to_string()],
            self.timeout,
        );
        self.runner
            .run(&cmd)
            .map_err(|source| MountError::Unmount {
                mount_point: mount_point.clone(),
                source,
            })?;
        tracing::info!(mount_point = %mount_point.display(), "unmounted archive");
        Ok(true)
    }
}
