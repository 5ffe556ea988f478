//! Layered configuration
//!
//! Implements the 4-layer configuration merge:
//! 1. Built-in defaults
//! 2. Host config (~/.config/ats/session.toml)
//! 3. Explicit config file (--config)
//! 4. CLI overrides

mod defaults;
mod effective;
mod merge;

pub use defaults::{MountConfig, OrchestratorConfig, ResultsConfig, SnapshotConfig};
pub use effective::{
    default_host_config_path, ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig,
};
pub use merge::{merge_into, merge_layers};
