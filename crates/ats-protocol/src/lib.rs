//! ATS Protocol Types
//!
//! Defines the versioned messages exchanged with the session runtime:
//! the incoming session request, out-of-band notifications, and the
//! session-creation request used to start a retry attempt.

pub mod error;
pub mod request;
pub mod session;

pub use error::ProtocolError;
pub use request::{
    CommandInfo, DeviceActionConfigObject, DeviceDimension, NewMultiCommandRequest, OptionValue,
    ShardingMode, TestContext, TestEnvironment, TestResource,
};
pub use session::{CreateSessionRequest, RequestBody, SessionNotification, SessionRequest};

/// Minimum request schema version accepted by this implementation.
pub const SCHEMA_VERSION_MIN: u32 = 1;

/// Maximum request schema version accepted by this implementation.
pub const SCHEMA_VERSION_MAX: u32 = 1;

/// URL scheme of resources that can be resolved on the local filesystem.
pub const FILE_URL_PREFIX: &str = "file://";

/// Strip the `file://` scheme from a URL, if present.
pub fn local_path_of(url: &str) -> Option<&str> {
    url.strip_prefix(FILE_URL_PREFIX)
}
