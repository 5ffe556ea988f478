//! Result directory layout
//!
//! Every command writes to `<output>/<session id>/<command id>`. A pass
//! first fills a fresh `<yyyyMMdd_HHmmss_SSS>_<suffix>` directory inside it,
//! then merges that directory up one level, so the command location only
//! ever holds data addressed by session and command.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ats_protocol::local_path_of;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex_lite::Regex;
use walkdir::WalkDir;

use super::collaborators::ResultProcessingError;

/// Length of the random suffix of a fresh result directory.
const RESULT_DIR_SUFFIX_LEN: usize = 6;

/// Names never carried forward into a retry attempt.
pub const NOT_RETRY_FILES: &[&str] = &[
    "checksum.data",
    "checksum.previous.data",
    "test_result_failures_suite.html",
    "test_result.html",
    "invocation_summary.txt",
    "checksum-suite.data",
    "diffs",
    "module_reports",
    "proto",
    "logs",
];

/// Zipped result of a previous attempt, e.g. `2024.01.31_12.00.00.123_4567.zip`.
const RESULT_ZIP_PATTERN: &str = r"^\d{4}\.\d{2}\.\d{2}_\d{2}\.\d{2}\.\d{2}(\.\d{3})?_\d{4}\.zip$";

/// Serializes result processing across the process.
static RESULT_PROCESSING_LOCK: Mutex<()> = Mutex::new(());

/// Hold the process-wide result processing lock.
pub fn lock_result_processing() -> MutexGuard<'static, ()> {
    RESULT_PROCESSING_LOCK
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Local root of the request's output URL.
pub fn output_root(output_url: &str) -> Result<PathBuf, ResultProcessingError> {
    local_path_of(output_url)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| ResultProcessingError::UnsupportedOutputUrl(output_url.to_string()))
}

/// `<root>/<session id>/<command id>`
pub fn command_output_dir(root: &Path, session_id: &str, command_id: &str) -> PathBuf {
    root.join(session_id).join(command_id)
}

/// Create a fresh, uniquely named directory inside `parent`.
pub fn create_fresh_dir(parent: &Path) -> Result<PathBuf, ResultProcessingError> {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RESULT_DIR_SUFFIX_LEN)
        .map(char::from)
        .collect();
    let name = format!(
        "{}_{}",
        chrono::Local::now().format("%Y%m%d_%H%M%S_%3f"),
        suffix
    );
    let dir = parent.join(name);
    fs::create_dir_all(&dir).map_err(|e| ResultProcessingError::io(&dir, e))?;
    Ok(dir)
}

/// Move the contents of `dir` into its parent and remove `dir`.
///
/// Existing directories merge recursively; existing files are replaced.
pub fn merge_up(dir: &Path) -> Result<(), ResultProcessingError> {
    let parent = dir
        .parent()
        .ok_or_else(|| ResultProcessingError::io(dir, std::io::ErrorKind::NotFound.into()))?;
    move_contents(dir, parent)?;
    fs::remove_dir_all(dir).map_err(|e| ResultProcessingError::io(dir, e))
}

fn move_contents(from: &Path, to: &Path) -> Result<(), ResultProcessingError> {
    let entries = fs::read_dir(from).map_err(|e| ResultProcessingError::io(from, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| ResultProcessingError::io(from, e))?;
        let source = entry.path();
        let target = to.join(entry.file_name());

        if source.is_dir() && target.is_dir() {
            move_contents(&source, &target)?;
            continue;
        }
        if target.is_dir() {
            fs::remove_dir_all(&target).map_err(|e| ResultProcessingError::io(&target, e))?;
        } else if target.exists() {
            fs::remove_file(&target).map_err(|e| ResultProcessingError::io(&target, e))?;
        }
        fs::rename(&source, &target).map_err(|e| ResultProcessingError::io(&source, e))?;
    }
    Ok(())
}

/// Copy the previous attempt's results into `to`, skipping generated reports
/// and anything already present. Returns the number of files copied.
pub fn copy_retry_files(from: &Path, to: &Path) -> Result<usize, ResultProcessingError> {
    if !from.is_dir() {
        tracing::debug!(dir = %from.display(), "no previous results to carry forward");
        return Ok(0);
    }
    let result_zip = Regex::new(RESULT_ZIP_PATTERN).ok();

    let mut copied = 0;
    let walker = WalkDir::new(from).min_depth(1).into_iter().filter_entry(|e| {
        let name = e.file_name().to_string_lossy();
        !NOT_RETRY_FILES.contains(&name.as_ref())
            && !result_zip.as_ref().is_some_and(|re| re.is_match(&name))
    });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(from).to_path_buf();
            ResultProcessingError::io(&path, e.into())
        })?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|_| ResultProcessingError::io(entry.path(), std::io::ErrorKind::InvalidInput.into()))?;
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| ResultProcessingError::io(&target, e))?;
        } else if !target.exists() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| ResultProcessingError::io(parent, e))?;
            }
            fs::copy(entry.path(), &target).map_err(|e| ResultProcessingError::io(&target, e))?;
            copied += 1;
        }
    }
    Ok(copied)
}
