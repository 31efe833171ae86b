//! Transport errors and their HTTP mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use mcp_resume_core::{ReplayError, StreamId};
use mcp_resume_session::ManagerError;
use thiserror::Error;

use crate::{
    protocol::{self, codes},
    registry::RegistryError,
    streams::ResumeError,
};

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Missing mcp-session-id header")]
    MissingSessionId,
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Stream already open: {0}")]
    Conflict(StreamId),
    #[error("Cannot resume: {0}")]
    Replay(#[from] ReplayError),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

impl TransportError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::MissingSessionId | Self::BadRequest(_) | Self::Parse(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::SessionNotFound(_) | Self::Replay(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
        }
    }

    const fn code(&self) -> i64 {
        match self {
            Self::Parse(_) => codes::PARSE_ERROR,
            Self::MissingSessionId | Self::BadRequest(_) | Self::Conflict(_) => {
                codes::INVALID_REQUEST
            }
            Self::SessionNotFound(_) | Self::Replay(_) => codes::NOT_FOUND,
        }
    }
}

impl From<ManagerError> for TransportError {
    fn from(err: ManagerError) -> Self {
        match err {
            ManagerError::NotFound(id) => Self::SessionNotFound(id),
        }
    }
}

impl From<RegistryError> for TransportError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Conflict(id)
            | RegistryError::NotRegistered(id)
            | RegistryError::AlreadyClosed(id) => Self::Conflict(id),
        }
    }
}

impl From<ResumeError> for TransportError {
    fn from(err: ResumeError) -> Self {
        match err {
            ResumeError::Replay(e) => Self::Replay(e),
            ResumeError::Registry(e) => e.into(),
        }
    }
}

impl IntoResponse for TransportError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {self}");
        } else {
            tracing::debug!(status = status.as_u16(), "Request rejected: {self}");
        }
        let body = protocol::error(None, self.code(), self.to_string(), None);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(TransportError::MissingSessionId.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            TransportError::SessionNotFound("s".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            TransportError::from(ReplayError::UnknownStream("s".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            TransportError::from(RegistryError::Conflict("s".into())).status(),
            StatusCode::CONFLICT
        );
    }
}
