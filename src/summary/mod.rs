//! Request summary and command outcome taxonomy
//!
//! Folds a published request snapshot into the aggregated view printed by
//! `ats-session show`: one verdict per command, request-level counts and the
//! error chain.

mod outcome;
mod request_summary;

pub use outcome::{CommandVerdict, ExitCode};
pub use request_summary::{
    CommandSummary, RequestSummary, REQUEST_SUMMARY_SCHEMA_ID, REQUEST_SUMMARY_SCHEMA_VERSION,
};
