//! Parser for xTS test command lines.
//!
//! A command line names a test plan followed by flags, for example
//! `cts -m CtsGestureTestCases --shard-count 2`. The parser extracts the
//! parts the session coordinator needs to validate a command and keeps the
//! remaining arguments in their original order.

mod parser;

pub use parser::{parse, tokenize};

use serde::{Deserialize, Serialize};

/// Parsed xTS command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCommand {
    /// First token, e.g. `cts` or `cts-on-gsi`.
    pub test_plan: String,

    /// Suite family derived from the plan, e.g. `cts`.
    pub xts_type: String,

    /// Modules named by `-m`/`--module` or by include filters, deduplicated.
    #[serde(default)]
    pub modules: Vec<String>,

    /// Single test named by `-t`/`--test`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_name: Option<String>,

    /// Value of `--shard-count`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_count: Option<u32>,

    #[serde(default)]
    pub include_filters: Vec<String>,

    #[serde(default)]
    pub exclude_filters: Vec<String>,

    /// Everything else, in original order.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl ParsedCommand {
    /// Whether the command runs the whole plan rather than selected modules.
    pub fn is_full_plan(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Errors raised while parsing a command line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty command line")]
    Empty,

    #[error("unterminated quote")]
    UnterminatedQuote,

    #[error("command line must start with a test plan, got flag {0}")]
    MissingTestPlan(String),

    #[error("flag {0} requires a value")]
    MissingValue(String),

    #[error("invalid shard count: {0}")]
    InvalidShardCount(String),

    #[error("a test can only be selected together with a module")]
    TestWithoutModule,
}
