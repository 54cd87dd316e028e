//! Authenticated session state.
//!
//! A [`SessionStore`] is owned by the application context and passed to
//! whatever needs the credential; there is no ambient global. Expiry is
//! advisory: the backend remains the authority on whether a token is still
//! accepted.
//!
//! The store also remembers the OAuth `state` issued by the last
//! `auth login`, in a `.state` file beside the session file, so the
//! callback can be matched to the sign-in that started it.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SessionError;
use crate::github::GitHubUser;

/// Sessions are considered valid for this many days after issue.
pub const SESSION_VALIDITY_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user: GitHubUser,
    pub access_token: String,
    pub issued_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user: GitHubUser, access_token: impl Into<String>, issued_at: DateTime<Utc>) -> Self {
        Self {
            user,
            access_token: access_token.into(),
            issued_at,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + TimeDelta::days(SESSION_VALIDITY_DAYS)
    }

    /// Valid until the elapsed time since issue exceeds the window.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now - self.issued_at <= TimeDelta::days(SESSION_VALIDITY_DAYS)
    }
}

/// Holds at most one session, optionally mirrored to a JSON file.
#[derive(Debug, Default)]
pub struct SessionStore {
    current: Option<Session>,
    path: Option<PathBuf>,
    pending_state: Option<String>,
}

impl SessionStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a file-backed store, loading a previously stored session.
    /// An expired or unreadable session found on disk is removed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let path = path.into();
        let current = match read_session(&path) {
            Ok(current) => current,
            Err(SessionError::Corrupt { source, .. }) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %source,
                    "session file is corrupt; discarding it"
                );
                remove_if_exists(&path)?;
                None
            }
            Err(e) => return Err(e),
        };
        let mut store = Self {
            current,
            path: Some(path),
            pending_state: None,
        };
        if store.current.is_some() && !store.is_valid() {
            tracing::debug!("stored session expired; clearing");
            store.clear()?;
        }
        Ok(store)
    }

    pub fn store(&mut self, session: Session) -> Result<(), SessionError> {
        if let Some(path) = &self.path {
            write_session(path, &session)?;
        }
        tracing::info!(user = %session.user.login, expires_at = %session.expires_at(), "session stored");
        self.current = Some(session);
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.current
            .as_ref()
            .is_some_and(|session| session.is_valid_at(now))
    }

    /// The session, only while it is still within its validity window.
    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref().filter(|_| self.is_valid())
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.current().map(|s| s.access_token.as_str())
    }

    pub fn clear(&mut self) -> Result<(), SessionError> {
        self.current = None;
        if let Some(path) = &self.path {
            remove_if_exists(path)?;
        }
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn state_path(&self) -> Option<PathBuf> {
        self.path.as_ref().map(|path| path.with_extension("state"))
    }

    /// Remember the `state` sent with an authorization request, replacing
    /// any earlier pending sign-in.
    pub fn begin_login(&mut self, state: &str) -> Result<(), SessionError> {
        if let Some(path) = self.state_path() {
            write_private(&path, state)?;
        }
        self.pending_state = Some(state.to_string());
        Ok(())
    }

    /// Consume the pending `state`. A state is good for one callback only.
    pub fn take_pending_state(&mut self) -> Result<Option<String>, SessionError> {
        let in_memory = self.pending_state.take();
        let Some(path) = self.state_path() else {
            return Ok(in_memory);
        };
        if !path.exists() {
            return Ok(in_memory);
        }
        let content = fs::read_to_string(&path).map_err(|source| SessionError::Io {
            path: path.clone(),
            source,
        })?;
        remove_if_exists(&path)?;
        let state = content.trim();
        Ok((!state.is_empty()).then(|| state.to_string()))
    }
}

fn remove_if_exists(path: &Path) -> Result<(), SessionError> {
    if path.exists() {
        fs::remove_file(path).map_err(|source| SessionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

fn read_session(path: &Path) -> Result<Option<Session>, SessionError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).map_err(|source| SessionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| SessionError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

fn write_session(path: &Path, session: &Session) -> Result<(), SessionError> {
    let json = serde_json::to_string_pretty(session).map_err(|source| SessionError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    write_private(path, &json)
}

/// Write `contents` readable by the owner only.
fn write_private(path: &Path, contents: &str) -> Result<(), SessionError> {
    let io_err = |source| SessionError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, contents).map_err(io_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
            tracing::warn!("failed to chmod 0600 {}: {e}", path.display());
        }
    }
    Ok(())
}
