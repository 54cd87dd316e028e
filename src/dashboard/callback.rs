//! OAuth callback handling.
//!
//! The callback is a small state machine: [`CallbackState::start`] inspects
//! the query and checks its `state` against the one issued at sign-in, then
//! [`CallbackState::complete`] folds the code exchange result in. Every
//! terminal state carries the redirect that follows it.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::client::{AuthResponse, TokenExchange};
use crate::errors::{AuthError, NetworkError};
use crate::session::{Session, SessionStore};

pub const FAILURE_REDIRECT_DELAY: Duration = Duration::from_secs(3);
pub const SUCCESS_REDIRECT_DELAY: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub state: Option<String>,
}

impl CallbackParams {
    /// Parse a query string, with or without the leading `?`. A full
    /// callback URL is accepted too.
    pub fn from_query(input: &str) -> Self {
        let query = match input.split_once('?') {
            Some((_, q)) => q,
            None => input,
        };
        let query = query.split('#').next().unwrap_or_default();

        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = Some(value.into_owned()).filter(|v| !v.is_empty());
            match key.as_ref() {
                "code" => params.code = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                "state" => params.state = value,
                _ => {}
            }
        }
        params
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    Dashboard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redirect {
    pub to: Route,
    pub after: Duration,
}

impl Redirect {
    pub fn to_login() -> Self {
        Self {
            to: Route::Login,
            after: FAILURE_REDIRECT_DELAY,
        }
    }

    pub fn to_dashboard() -> Self {
        Self {
            to: Route::Dashboard,
            after: SUCCESS_REDIRECT_DELAY,
        }
    }

    /// Sleep for the redirect delay, then yield the destination.
    pub async fn wait(self) -> Route {
        tokio::time::sleep(self.after).await;
        self.to
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackState {
    Exchanging { code: String },
    Succeeded { login: String },
    Failed { message: String },
}

impl CallbackState {
    /// `expected_state` is the value sent with the authorization request;
    /// a callback without it, or carrying a different one, is refused
    /// before any code is exchanged.
    pub fn start(params: &CallbackParams, expected_state: Option<&str>) -> Self {
        if let Some(error) = &params.error {
            let message = params
                .error_description
                .clone()
                .unwrap_or_else(|| AuthError::Denied(error.clone()).to_string());
            return Self::Failed { message };
        }
        let state_matches = matches!(
            (params.state.as_deref(), expected_state),
            (Some(got), Some(want)) if got == want
        );
        if !state_matches {
            tracing::warn!(
                received = params.state.is_some(),
                pending = expected_state.is_some(),
                "OAuth callback state mismatch"
            );
            return Self::Failed {
                message: AuthError::StateMismatch.to_string(),
            };
        }
        match &params.code {
            Some(code) => Self::Exchanging { code: code.clone() },
            None => Self::Failed {
                message: AuthError::MissingCode.to_string(),
            },
        }
    }

    /// Fold the exchange result in. On success the session is stored.
    /// Only meaningful from `Exchanging`; other states are returned as-is.
    pub fn complete(
        self,
        result: Result<AuthResponse, NetworkError>,
        store: &mut SessionStore,
        now: DateTime<Utc>,
    ) -> Self {
        if !matches!(self, Self::Exchanging { .. }) {
            return self;
        }
        let outcome = result.map_err(AuthError::from).and_then(|resp| {
            let login = resp.user.login.clone();
            store.store(Session::new(resp.user, resp.access_token, now))?;
            Ok(login)
        });
        match outcome {
            Ok(login) => Self::Succeeded { login },
            Err(e) => {
                tracing::warn!(error = %e, "OAuth callback failed");
                Self::Failed {
                    message: e.to_string(),
                }
            }
        }
    }

    /// Redirect scheduled by a finished state.
    pub fn redirect(&self) -> Option<Redirect> {
        match self {
            Self::Exchanging { .. } => None,
            Self::Succeeded { .. } => Some(Redirect::to_dashboard()),
            Self::Failed { .. } => Some(Redirect::to_login()),
        }
    }
}

/// Result of processing one callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackOutcome {
    pub state: CallbackState,
    pub redirect: Redirect,
}

/// Run the full callback: validate the query, exchange the code, store the
/// session.
pub async fn handle_callback<E>(
    params: &CallbackParams,
    expected_state: Option<&str>,
    exchange: &E,
    store: &mut SessionStore,
) -> CallbackOutcome
where
    E: TokenExchange + ?Sized,
{
    let state = match CallbackState::start(params, expected_state) {
        CallbackState::Exchanging { code } => {
            let result = exchange.exchange(&code).await;
            CallbackState::Exchanging { code }.complete(result, store, Utc::now())
        }
        finished => finished,
    };
    let redirect = state.redirect().unwrap_or_else(Redirect::to_login);
    CallbackOutcome { state, redirect }
}
