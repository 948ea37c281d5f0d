//! Gateway error kinds and their associated WebSocket close behavior.

use axum::extract::ws::close_code;
use thiserror::Error;

/// Errors that can terminate a session, paired with the WebSocket close code
/// they map to. Recoverable errors (malformed frames, forwarding failures)
/// are represented separately and never become a `GatewayError`.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing or empty `containerId` query parameter.
    #[error("{0}")]
    BadRequest(String),

    /// The container engine reports no such container.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// The container exists but is not running.
    #[error("Container not running")]
    ContainerNotRunning,

    /// Exec creation or start failed inside the container.
    #[error("attach failed: {0}")]
    AttachFailed(String),

    /// A mid-session I/O error on either the client or the server stream.
    #[error("stream error: {0}")]
    StreamError(String),
}

impl GatewayError {
    /// The WebSocket close code this error maps to.
    pub fn close_code(&self) -> u16 {
        match self {
            GatewayError::BadRequest(_)
            | GatewayError::ContainerNotFound(_)
            | GatewayError::ContainerNotRunning => close_code::POLICY,
            GatewayError::AttachFailed(_) | GatewayError::StreamError(_) => close_code::ERROR,
        }
    }

    /// The close reason string sent to the client alongside the close code.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_closes_policy_violation() {
        let e = GatewayError::BadRequest("Missing containerId parameter".into());
        assert_eq!(e.close_code(), close_code::POLICY);
        assert_eq!(e.reason(), "Missing containerId parameter");
    }

    #[test]
    fn container_not_running_closes_policy_violation() {
        let e = GatewayError::ContainerNotRunning;
        assert_eq!(e.close_code(), close_code::POLICY);
        assert_eq!(e.reason(), "Container not running");
    }

    #[test]
    fn attach_failed_closes_internal_error() {
        let e = GatewayError::AttachFailed("exec create failed".into());
        assert_eq!(e.close_code(), close_code::ERROR);
    }

    #[test]
    fn stream_error_closes_internal_error() {
        let e = GatewayError::StreamError("broken pipe".into());
        assert_eq!(e.close_code(), close_code::ERROR);
    }
}
