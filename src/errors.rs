//! Typed error hierarchy for Dependify.
//!
//! One enum per boundary:
//! - `NetworkError` - any backend/GitHub HTTP call that did not succeed
//! - `SubmitError` - job submission (`Validation` | `Network`)
//! - `AuthError` - OAuth callback, code exchange and hub session tokens
//! - `FeedError` - progress feed transport
//! - `SessionError` - session persistence
//! - `HubError` - progress hub job registry

use std::path::PathBuf;

use dependify_common::{EventError, JobId, RepoRefError};
use thiserror::Error;

/// A backend call that could not be completed.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("{endpoint} is unreachable: {source}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} responded with {status}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("unexpected response body from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
}

impl NetworkError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors from the job submission client.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Invalid repository reference: {0}")]
    Validation(#[from] RepoRefError),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Errors from the OAuth flow.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("GitHub authorization was not granted: {0}")]
    Denied(String),

    #[error("OAuth callback did not include an authorization code")]
    MissingCode,

    #[error("OAuth state did not match the pending sign-in; start again with `dependify auth login`")]
    StateMismatch,

    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid session token: {0}")]
    InvalidToken(String),

    #[error("Session token has expired")]
    TokenExpired,

    #[error("Failed to sign session token: {0}")]
    Signing(String),

    #[error("GitHub OAuth is not configured (set GITHUB_CLIENT_ID and GITHUB_CLIENT_SECRET)")]
    NotConfigured,

    #[error("GitHub OAuth error: {0}")]
    GitHub(String),

    #[error("Failed to store session: {0}")]
    Session(#[from] SessionError),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Errors from the progress feed transport.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Invalid feed URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Failed to connect to progress feed at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },

    #[error("Progress feed connection dropped: {0}")]
    Dropped(String),

    #[error("Undecodable message on progress feed: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Errors from session persistence.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to access session file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Session file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from the progress hub.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Job {id} not found")]
    JobNotFound { id: JobId },

    #[error("Job registry lock poisoned")]
    LockPoisoned,

    #[error("Invalid repository reference: {0}")]
    InvalidReference(#[from] RepoRefError),

    #[error("Invalid progress event: {0}")]
    InvalidEvent(#[from] EventError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_error_wraps_validation_failure() {
        let err: SubmitError = RepoRefError::Empty.into();
        assert!(matches!(err, SubmitError::Validation(RepoRefError::Empty)));
        assert!(err.to_string().contains("Invalid repository reference"));
    }

    #[test]
    fn network_status_error_carries_code() {
        let err = NetworkError::Status {
            endpoint: "http://localhost:5001/api/jobs".into(),
            status: 503,
            message: "unavailable".into(),
        };
        assert_eq!(err.status_code(), Some(503));
        assert!(err.to_string().contains("503"));

        let submit: SubmitError = err.into();
        assert!(matches!(submit, SubmitError::Network(_)));
    }

    #[test]
    fn hub_error_job_not_found_carries_id() {
        let err = HubError::JobNotFound {
            id: JobId::new("abc"),
        };
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn session_error_carries_path() {
        let err = SessionError::Io {
            path: PathBuf::from("/tmp/session.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        match &err {
            SessionError::Io { path, source } => {
                assert_eq!(path, &PathBuf::from("/tmp/session.json"));
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected Io"),
        }
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&AuthError::MissingCode);
        assert_std_error(&AuthError::TokenExpired);
        assert_std_error(&FeedError::Dropped("eof".into()));
        assert_std_error(&HubError::LockPoisoned);
        assert_std_error(&SubmitError::Validation(RepoRefError::Empty));
    }
}
