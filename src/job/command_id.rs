//! Stable command ids
//!
//! A command id is a UUIDv5 of the canonical command line. When a
//! single-command request resumes a previous context, the canonical line is
//! the previous attempt's, so a command keeps its id across every attempt of
//! the same logical test. The request-level context names one command, so a
//! request with several commands always uses each command's own line.

use ats_protocol::{CommandInfo, NewMultiCommandRequest};
use uuid::Uuid;

/// The command line that identifies `info` within `request`.
pub fn canonical_command_line<'a>(
    request: &'a NewMultiCommandRequest,
    info: &'a CommandInfo,
) -> &'a str {
    match &request.prev_test_context {
        Some(context) if request.commands.len() == 1 && !context.command_line.is_empty() => {
            &context.command_line
        }
        _ => &info.command_line,
    }
}

/// Stable id of `info` within `request`.
pub fn command_id(request: &NewMultiCommandRequest, info: &CommandInfo) -> String {
    command_id_of_line(canonical_command_line(request, info))
}

/// Stable id of a canonical command line.
pub fn command_id_of_line(command_line: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, command_line.as_bytes()).to_string()
}
