use serde::{Deserialize, Serialize};

use crate::errors::{AuthError, NetworkError};

const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_USER_URL: &str = "https://api.github.com/user";
const USER_AGENT: &str = "dependify";

/// Scope requested during authorization; forks and pull requests need `repo`.
pub const OAUTH_SCOPE: &str = "repo";

/// Profile of the authenticated GitHub user (subset of fields).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitHubUser {
    pub id: i64,
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Response from GitHub's OAuth token endpoint.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Result of a successful code exchange.
#[derive(Debug, Clone)]
pub struct GitHubGrant {
    pub access_token: String,
    pub user: GitHubUser,
}

/// Known GitHub token prefixes.
/// See: https://github.blog/2021-04-05-behind-githubs-new-authentication-token-formats/
const GITHUB_TOKEN_PREFIXES: &[&str] = &[
    "ghp_",        // Personal access tokens (classic)
    "github_pat_", // Fine-grained personal access tokens
    "gho_",        // OAuth access tokens
    "ghu_",        // GitHub App user-to-server tokens
    "ghs_",        // GitHub App server-to-server tokens
    "ghr_",        // GitHub App refresh tokens
];

/// Format check only; says nothing about whether the token is active.
pub fn is_valid_github_token(token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    GITHUB_TOKEN_PREFIXES
        .iter()
        .any(|prefix| token.starts_with(prefix))
}

/// URL the user is sent to in order to authorize the OAuth app.
pub fn authorize_url(client_id: &str, redirect_uri: &str, state: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", OAUTH_SCOPE)
        .append_pair("state", state)
        .finish();
    format!("{}?{}", GITHUB_AUTHORIZE_URL, query)
}

/// A configured GitHub OAuth application.
#[derive(Debug, Clone)]
pub struct OAuthApp {
    client_id: String,
    client_secret: String,
    token_url: String,
    user_url: String,
}

impl OAuthApp {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: GITHUB_TOKEN_URL.to_string(),
            user_url: GITHUB_USER_URL.to_string(),
        }
    }

    /// Point the app at different token/user endpoints (GitHub Enterprise,
    /// local stand-ins).
    pub fn with_endpoints(mut self, token_url: impl Into<String>, user_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self.user_url = user_url.into();
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Exchange an authorization code for an access token, then load the
    /// user's profile with it.
    pub async fn exchange_code(
        &self,
        http: &reqwest::Client,
        code: &str,
    ) -> Result<GitHubGrant, AuthError> {
        let resp = http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
            ])
            .send()
            .await
            .map_err(|source| NetworkError::Unreachable {
                endpoint: self.token_url.clone(),
                source,
            })?;

        let resp = check_status(&self.token_url, resp).await?;
        let token = resp
            .json::<TokenResponse>()
            .await
            .map_err(|source| NetworkError::Decode {
                endpoint: self.token_url.clone(),
                source,
            })?;

        if let Some(error) = token.error {
            let detail = token.error_description.unwrap_or(error);
            return Err(AuthError::GitHub(detail));
        }
        let access_token = token
            .access_token
            .ok_or_else(|| AuthError::GitHub("token response had no access_token".into()))?;
        if !is_valid_github_token(&access_token) {
            return Err(AuthError::GitHub(
                "token response carried an unrecognized access token format".into(),
            ));
        }

        let user = self.fetch_user(http, &access_token).await?;
        tracing::info!(login = %user.login, "GitHub code exchanged");
        Ok(GitHubGrant { access_token, user })
    }

    pub async fn fetch_user(
        &self,
        http: &reqwest::Client,
        access_token: &str,
    ) -> Result<GitHubUser, NetworkError> {
        let resp = http
            .get(&self.user_url)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|source| NetworkError::Unreachable {
                endpoint: self.user_url.clone(),
                source,
            })?;
        check_status(&self.user_url, resp)
            .await?
            .json::<GitHubUser>()
            .await
            .map_err(|source| NetworkError::Decode {
                endpoint: self.user_url.clone(),
                source,
            })
    }
}

/// Turn a non-success response into [`NetworkError::Status`], keeping the
/// body text as the message.
pub(crate) async fn check_status(
    endpoint: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, NetworkError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .or_else(|| v.get("detail"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or(body);
    Err(NetworkError::Status {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        message,
    })
}
