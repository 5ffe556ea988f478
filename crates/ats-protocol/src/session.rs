//! Session-level envelopes: requests, notifications and session creation.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::request::NewMultiCommandRequest;
use crate::{SCHEMA_VERSION_MAX, SCHEMA_VERSION_MIN};

/// Versioned envelope embedded in a session's plugin configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Schema version of the envelope.
    pub schema_version: u32,

    /// The request itself.
    pub request: RequestBody,
}

/// Kinds of request a session may carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestBody {
    /// Run a list of xTS commands.
    NewMultiCommandRequest(NewMultiCommandRequest),
    /// Any request kind this build does not handle.
    #[serde(other)]
    Unsupported,
}

impl SessionRequest {
    /// Wrap a multi-command request in the current envelope version.
    pub fn new_multi_command(request: NewMultiCommandRequest) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_MAX,
            request: RequestBody::NewMultiCommandRequest(request),
        }
    }

    /// The multi-command request, if that is what this envelope carries.
    pub fn as_new_multi_command(&self) -> Option<&NewMultiCommandRequest> {
        match &self.request {
            RequestBody::NewMultiCommandRequest(r) => Some(r),
            RequestBody::Unsupported => None,
        }
    }

    /// Decode and version-check an envelope.
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        let request: Self = serde_json::from_str(json)?;
        request.check_version()?;
        Ok(request)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn check_version(&self) -> Result<(), ProtocolError> {
        if self.schema_version < SCHEMA_VERSION_MIN || self.schema_version > SCHEMA_VERSION_MAX {
            return Err(ProtocolError::UnsupportedVersion {
                found: self.schema_version,
                min: SCHEMA_VERSION_MIN,
                max: SCHEMA_VERSION_MAX,
            });
        }
        Ok(())
    }
}

/// Out-of-band message delivered to a running session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionNotification {
    /// Cancel the whole session.
    CancelSession {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Any notification kind this build does not handle.
    #[serde(other)]
    Unsupported,
}

/// Request to the session service to start a new session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Human-readable session name.
    pub session_name: String,

    /// Label of the plugin that should handle the new session.
    pub plugin_label: String,

    /// Request the new session runs.
    pub request: SessionRequest,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::CommandInfo;

    #[test]
    fn test_envelope_round_trip_keeps_kind() {
        let request = SessionRequest::new_multi_command(NewMultiCommandRequest {
            commands: vec![CommandInfo {
                command_line: "cts -m CtsGestureTestCases".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        });

        let json = request.to_json().unwrap();
        assert!(json.contains(r#""type": "new_multi_command_request""#));

        let parsed = SessionRequest::from_json(&json).unwrap();
        assert_eq!(parsed.as_new_multi_command().unwrap().commands.len(), 1);
    }

    #[test]
    fn test_unknown_kind_is_unsupported() {
        let parsed =
            SessionRequest::from_json(r#"{"schema_version": 1, "request": {"type": "get_devices"}}"#)
                .unwrap();
        assert_eq!(parsed.request, RequestBody::Unsupported);
        assert!(parsed.as_new_multi_command().is_none());
    }

    #[test]
    fn test_future_version_rejected() {
        let result = SessionRequest::from_json(
            r#"{"schema_version": 7, "request": {"type": "new_multi_command_request"}}"#,
        );
        assert!(matches!(
            result,
            Err(ProtocolError::UnsupportedVersion { found: 7, .. })
        ));
    }

    #[test]
    fn test_cancel_notification_parse() {
        let notification: SessionNotification =
            serde_json::from_str(r#"{"type": "cancel_session", "reason": "user"}"#).unwrap();
        assert_eq!(
            notification,
            SessionNotification::CancelSession {
                reason: Some("user".to_string())
            }
        );

        let other: SessionNotification = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert_eq!(other, SessionNotification::Unsupported);
    }
}
