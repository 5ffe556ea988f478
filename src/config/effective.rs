//! Effective configuration with provenance
//!
//! Records the merged configuration together with every contributing layer
//! and the digest of each file that was read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use super::defaults::OrchestratorConfig;
use super::merge::merge_layers;

/// Schema identifier
pub const SCHEMA_ID: &str = "ats-session/effective_config@1";

/// Upper bound for the slow command timeout (one day)
const MAX_TIMEOUT_SECONDS: u64 = 86_400;

/// Keys that contain secrets and should be redacted
const SECRET_KEYS: &[&str] = &["password", "token", "secret", "credential", "api_key"];

/// Origin of a configuration layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    Host,
    File,
    Cli,
}

/// A contributing layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// SHA-256 digest of raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Merged configuration with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub schema_id: String,

    pub created_at: DateTime<Utc>,

    /// The merged configuration object
    pub config: Value,

    /// Contributing layers in precedence order
    pub sources: Vec<ConfigSource>,

    /// Redacted key paths
    pub redactions: Vec<String>,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Default host config location: `~/.config/ats/session.toml`
pub fn default_host_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".config").join("ats").join("session.toml"))
}

impl EffectiveConfig {
    /// Merge builtin defaults, the host file, an explicit file, and CLI
    /// overrides, in that order. Missing host files are skipped; a missing
    /// explicit file is an error.
    pub fn build(
        host_config_path: Option<&Path>,
        config_path: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = vec![OrchestratorConfig::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        if let Some(path) = host_config_path.filter(|p| p.exists()) {
            let (value, digest) = load_toml(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Host,
                path: Some(path.to_path_buf()),
                digest: Some(digest),
            });
        }

        if let Some(path) = config_path {
            let (value, digest) = load_toml(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(path.to_path_buf()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let mut config = merge_layers(layers);
        let mut redactions = Vec::new();
        redact(&mut config, "", &mut redactions);

        let effective = Self {
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config,
            sources,
            redactions,
        };
        effective.settings()?;
        Ok(effective)
    }

    /// Typed, validated view of the merged configuration.
    pub fn settings(&self) -> Result<OrchestratorConfig, ConfigError> {
        let settings: OrchestratorConfig = serde_json::from_value(self.config.clone())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if settings.slow_command_timeout_seconds == 0
            || settings.slow_command_timeout_seconds > MAX_TIMEOUT_SECONDS
        {
            return Err(ConfigError::Invalid(format!(
                "slow_command_timeout_seconds must be in (0, {}]",
                MAX_TIMEOUT_SECONDS
            )));
        }
        if settings.mount.command.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "mount.command must not be empty".to_string(),
            ));
        }
        Ok(settings)
    }

    /// Get a config value by dot-separated path
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.config, |current, part| current.get(part))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Read a TOML file, returning its value and the digest of its raw bytes.
fn load_toml(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let digest = hex::encode(Sha256::digest(&bytes));

    let text = String::from_utf8(bytes).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: format!("invalid UTF-8: {}", e),
    })?;
    let value: Value = toml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok((value, digest))
}

fn redact(value: &mut Value, prefix: &str, redactions: &mut Vec<String>) {
    let Value::Object(map) = value else {
        return;
    };
    for (key, val) in map.iter_mut() {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        let lower = key.to_lowercase();
        if val.is_string() && SECRET_KEYS.iter().any(|s| lower.contains(s)) {
            *val = Value::String("[REDACTED]".to_string());
            redactions.push(path);
        } else {
            redact(val, &path, redactions);
        }
    }
}
