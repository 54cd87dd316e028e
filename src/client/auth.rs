use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::endpoint;
use crate::errors::NetworkError;
use crate::github::{GitHubUser, check_status};

/// Body returned by `POST /auth/github`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub user: GitHubUser,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Trades an OAuth authorization code for a session credential.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self, code: &str) -> Result<AuthResponse, NetworkError>;
}

/// Exchanges codes through the backend's `/auth/github` endpoint, which holds
/// the OAuth client secret.
#[derive(Debug, Clone)]
pub struct BackendAuthClient {
    http: reqwest::Client,
    api_url: String,
}

/// Body returned by `GET /auth/me`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct MeResponse {
    user: GitHubUser,
}

impl BackendAuthClient {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
        }
    }

    /// Ask the backend who `token` belongs to. A 401 means the backend no
    /// longer accepts it.
    pub async fn me(&self, token: &str) -> Result<GitHubUser, NetworkError> {
        let url = endpoint(&self.api_url, "/auth/me");
        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| NetworkError::Unreachable {
                endpoint: url.clone(),
                source,
            })?;
        check_status(&url, resp)
            .await?
            .json::<MeResponse>()
            .await
            .map(|body| body.user)
            .map_err(|source| NetworkError::Decode {
                endpoint: url,
                source,
            })
    }
}

#[async_trait]
impl TokenExchange for BackendAuthClient {
    async fn exchange(&self, code: &str) -> Result<AuthResponse, NetworkError> {
        let url = endpoint(&self.api_url, "/auth/github");
        tracing::debug!(%url, "exchanging OAuth code");
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "code": code }))
            .send()
            .await
            .map_err(|source| NetworkError::Unreachable {
                endpoint: url.clone(),
                source,
            })?;
        check_status(&url, resp)
            .await?
            .json::<AuthResponse>()
            .await
            .map_err(|source| NetworkError::Decode {
                endpoint: url,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
    };

    async fn spawn_backend(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_exchange_returns_token_and_user() {
        let app = Router::new().route(
            "/auth/github",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["code"], "abc");
                Json(serde_json::json!({
                    "access_token": "gho_123",
                    "token_type": "bearer",
                    "user": {"id": 7, "login": "octocat"}
                }))
            }),
        );
        let base = spawn_backend(app).await;
        let resp = BackendAuthClient::new(base).exchange("abc").await.unwrap();
        assert_eq!(resp.access_token, "gho_123");
        assert_eq!(resp.user.login, "octocat");
    }

    #[tokio::test]
    async fn test_exchange_surfaces_backend_error_message() {
        let app = Router::new().route(
            "/auth/github",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({"error": "bad_verification_code"})),
                )
            }),
        );
        let base = spawn_backend(app).await;
        let err = BackendAuthClient::new(base).exchange("x").await.unwrap_err();
        match err {
            NetworkError::Status {
                status, message, ..
            } => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad_verification_code");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_me_sends_bearer_token() {
        let app = Router::new().route(
            "/auth/me",
            get(|headers: HeaderMap| async move {
                match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                    Some("Bearer hub.jwt.token") => (
                        StatusCode::OK,
                        Json(serde_json::json!({"user": {"id": 7, "login": "octocat"}})),
                    ),
                    _ => (
                        StatusCode::UNAUTHORIZED,
                        Json(serde_json::json!({"error": "Session token has expired"})),
                    ),
                }
            }),
        );
        let base = spawn_backend(app).await;
        let client = BackendAuthClient::new(base);

        let user = client.me("hub.jwt.token").await.unwrap();
        assert_eq!(user.login, "octocat");

        let err = client.me("stale").await.unwrap_err();
        assert_eq!(err.status_code(), Some(401));
    }

    #[test]
    fn test_auth_response_defaults_token_type() {
        let resp: AuthResponse =
            serde_json::from_str(r#"{"access_token":"t","user":{"id":1,"login":"a"}}"#).unwrap();
        assert_eq!(resp.token_type, "bearer");
    }
}
