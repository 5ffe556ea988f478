//! Error types for decoding protocol messages.

/// Errors raised while decoding or validating a protocol message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The payload was not valid JSON or did not match the schema.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The payload declares a schema version this build cannot read.
    #[error("unsupported schema version {found} (supported: {min}..={max})")]
    UnsupportedVersion { found: u32, min: u32, max: u32 },

    /// A required field was present but empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}
