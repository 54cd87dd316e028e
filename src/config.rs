//! Layered configuration for Dependify.
//!
//! Values resolve file → environment → CLI. The file lives at
//! `.dependify/dependify.toml`; every field has a default, so an empty or
//! missing file is valid.
//!
//! ```toml
//! [server]
//! port = 5001
//! frontend_url = "https://dependify.example"
//! pipeline_url = "https://pipeline.example/run"
//! auth_rate_per_minute = 10
//! jobs_rate_per_hour = 100
//! finished_job_ttl_secs = 3600
//!
//! [client]
//! api_url = "http://localhost:5001"
//! max_resubscribe_attempts = 5
//! resubscribe_backoff_ms = 500
//!
//! [github]
//! client_id = "Iv1.0123456789abcdef"
//! redirect_uri = "http://localhost:3000/auth/callback"
//! ```
//!
//! The OAuth client secret and the token signing key are read from
//! `GITHUB_CLIENT_SECRET` and `API_SECRET_KEY` only.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_DIR: &str = ".dependify";
pub const CONFIG_FILE: &str = "dependify.toml";

/// Origins the development frontend is served from.
const LOCAL_ORIGINS: &[&str] = &["http://localhost:3000", "http://127.0.0.1:3000"];

/// Progress hub settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origin of the dashboard frontend, allowed through CORS.
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
    /// Externally reachable base URL of the hub, handed to pipeline workers.
    #[serde(default)]
    pub public_url: Option<String>,
    /// Where new jobs are dispatched. Jobs stay queued when unset.
    #[serde(default)]
    pub pipeline_url: Option<String>,
    /// Per-job broadcast channel capacity.
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,
    /// HMAC key for hub-issued session tokens.
    #[serde(skip)]
    pub api_secret_key: Option<String>,
    /// Sign-in attempts per client per minute. Zero disables the limit.
    #[serde(default = "default_auth_rate_per_minute")]
    pub auth_rate_per_minute: u32,
    /// Job submissions per client per hour. Zero disables the limit.
    #[serde(default = "default_jobs_rate_per_hour")]
    pub jobs_rate_per_hour: u32,
    /// How long an opened or failed job stays queryable.
    #[serde(default = "default_finished_job_ttl_secs")]
    pub finished_job_ttl_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            frontend_url: default_frontend_url(),
            public_url: None,
            pipeline_url: None,
            feed_capacity: default_feed_capacity(),
            api_secret_key: None,
            auth_rate_per_minute: default_auth_rate_per_minute(),
            jobs_rate_per_hour: default_jobs_rate_per_hour(),
            finished_job_ttl_secs: default_finished_job_ttl_secs(),
        }
    }
}

/// Dashboard client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Defaults to `api_url` with the scheme switched to `ws`/`wss`.
    #[serde(default)]
    pub feed_url: Option<String>,
    #[serde(default)]
    pub session_file: Option<PathBuf>,
    #[serde(default = "default_max_resubscribe_attempts")]
    pub max_resubscribe_attempts: u32,
    #[serde(default = "default_resubscribe_backoff_ms")]
    pub resubscribe_backoff_ms: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            feed_url: None,
            session_file: None,
            max_resubscribe_attempts: default_max_resubscribe_attempts(),
            resubscribe_backoff_ms: default_resubscribe_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSection {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(skip)]
    pub client_secret: Option<String>,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: default_redirect_uri(),
        }
    }
}

fn default_port() -> u16 {
    5001
}

fn default_frontend_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_feed_capacity() -> usize {
    256
}

fn default_auth_rate_per_minute() -> u32 {
    10
}

fn default_jobs_rate_per_hour() -> u32 {
    100
}

fn default_finished_job_ttl_secs() -> u64 {
    3600
}

fn default_api_url() -> String {
    "http://localhost:5001".to_string()
}

fn default_max_resubscribe_attempts() -> u32 {
    5
}

fn default_resubscribe_backoff_ms() -> u64 {
    500
}

fn default_redirect_uri() -> String {
    "http://localhost:3000/auth/callback".to_string()
}

/// Complete configuration (file contents plus environment overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependifyConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub github: GitHubSection,
    /// Environment overrides that were present but could not be used.
    #[serde(skip)]
    env_warnings: Vec<String>,
}

impl DependifyConfig {
    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse dependify.toml")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Load `.dependify/dependify.toml` under `project_dir` (defaults when
    /// absent), then apply process environment overrides.
    pub fn resolve(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(CONFIG_DIR).join(CONFIG_FILE);
        let mut config = if path.exists() {
            Self::load(&path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment overrides through `lookup`. Empty values are
    /// treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = self.parse_env("PORT", get("PORT")) {
            self.server.port = port;
        }
        if let Some(v) = self.parse_env("RATE_LIMIT_PER_MINUTE", get("RATE_LIMIT_PER_MINUTE")) {
            self.server.auth_rate_per_minute = v;
        }
        if let Some(v) = self.parse_env("RATE_LIMIT_PER_HOUR", get("RATE_LIMIT_PER_HOUR")) {
            self.server.jobs_rate_per_hour = v;
        }
        if let Some(v) = get("API_SECRET_KEY") {
            self.server.api_secret_key = Some(v);
        }
        if let Some(v) = get("FRONTEND_URL") {
            self.server.frontend_url = v;
        }
        if let Some(v) = get("PUBLIC_URL") {
            self.server.public_url = Some(v);
        }
        if let Some(v) = get("PIPELINE_URL") {
            self.server.pipeline_url = Some(v);
        }
        if let Some(v) = get("DEPENDIFY_API_URL") {
            self.client.api_url = v;
        }
        if let Some(v) = get("DEPENDIFY_FEED_URL") {
            self.client.feed_url = Some(v);
        }
        if let Some(v) = get("DEPENDIFY_SESSION_FILE") {
            self.client.session_file = Some(PathBuf::from(v));
        }
        if let Some(v) = get("GITHUB_CLIENT_ID") {
            self.github.client_id = Some(v);
        }
        if let Some(v) = get("GITHUB_CLIENT_SECRET") {
            self.github.client_secret = Some(v);
        }
        if let Some(v) = get("GITHUB_REDIRECT_URI") {
            self.github.redirect_uri = v;
        }
    }

    fn parse_env<T: FromStr>(&mut self, key: &str, value: Option<String>) -> Option<T> {
        let value = value?;
        match value.trim().parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                tracing::warn!(key, value = %value, "ignoring unparseable environment override");
                self.env_warnings
                    .push(format!("{}={:?} is not valid and was ignored", key, value));
                None
            }
        }
    }

    /// CORS origins: the configured frontend plus the local dev origins.
    pub fn allowed_origins(&self) -> Vec<String> {
        let mut origins = vec![self.server.frontend_url.trim_end_matches('/').to_string()];
        for local in LOCAL_ORIGINS {
            if !origins.iter().any(|o| o == local) {
                origins.push(local.to_string());
            }
        }
        origins
    }

    /// Base URL pipeline workers use to reach the hub.
    pub fn public_url(&self) -> String {
        self.server
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.server.port))
    }

    /// WebSocket base URL of the progress feed.
    pub fn feed_url(&self) -> String {
        if let Some(url) = &self.client.feed_url {
            return url.trim_end_matches('/').to_string();
        }
        let api = self.client.api_url.trim_end_matches('/');
        if let Some(rest) = api.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = api.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            api.to_string()
        }
    }

    /// Session file location: configured path, or `~/.dependify/session.json`.
    pub fn session_file(&self) -> Option<PathBuf> {
        self.client.session_file.clone().or_else(|| {
            dirs::home_dir().map(|home| home.join(CONFIG_DIR).join("session.json"))
        })
    }

    pub fn resubscribe_backoff(&self) -> Duration {
        Duration::from_millis(self.client.resubscribe_backoff_ms)
    }

    pub fn finished_job_ttl(&self) -> Duration {
        Duration::from_secs(self.server.finished_job_ttl_secs)
    }

    /// Settings the hub needs for full operation that are missing.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.env_warnings.clone();
        if self.github.client_id.is_none() {
            warnings.push("GITHUB_CLIENT_ID is not set; /auth/github will be unavailable".into());
        }
        if self.github.client_secret.is_none() {
            warnings
                .push("GITHUB_CLIENT_SECRET is not set; /auth/github will be unavailable".into());
        }
        if self.server.pipeline_url.is_none() {
            warnings.push("PIPELINE_URL is not set; submitted jobs will stay queued".into());
        }
        if self.server.api_secret_key.is_none() {
            warnings.push(
                "API_SECRET_KEY is not set; session tokens will not survive a restart".into(),
            );
        }
        if self.server.feed_capacity == 0 {
            warnings.push("server.feed_capacity must be greater than zero".into());
        }
        warnings
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content =
            toml::to_string_pretty(self).context("Failed to serialize dependify.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DependifyConfig::default();
        assert_eq!(config.server.port, 5001);
        assert_eq!(config.client.api_url, "http://localhost:5001");
        assert_eq!(config.client.max_resubscribe_attempts, 5);
        assert_eq!(config.resubscribe_backoff(), Duration::from_millis(500));
        assert_eq!(config.server.feed_capacity, 256);
    }

    #[test]
    fn test_parse_empty_file_uses_defaults() {
        let config = DependifyConfig::parse("").unwrap();
        assert_eq!(config.server.frontend_url, "http://localhost:3000");
    }

    #[test]
    fn test_parse_sections() {
        let config = DependifyConfig::parse(
            r#"
[server]
port = 8080
pipeline_url = "https://pipeline.example/run"

[client]
api_url = "https://api.dependify.example"
max_resubscribe_attempts = 2

[github]
client_id = "Iv1.abc"
"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(
            config.server.pipeline_url.as_deref(),
            Some("https://pipeline.example/run")
        );
        assert_eq!(config.client.max_resubscribe_attempts, 2);
        assert_eq!(config.github.client_id.as_deref(), Some("Iv1.abc"));
    }

    #[test]
    fn test_parse_invalid_toml() {
        assert!(DependifyConfig::parse("[server\nport = ").is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = DependifyConfig::parse("[server]\nport = 8080").unwrap();
        config.apply_env(env(&[
            ("PORT", "9090"),
            ("GITHUB_CLIENT_SECRET", "shh"),
            ("DEPENDIFY_API_URL", "https://api.example"),
        ]));
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.github.client_secret.as_deref(), Some("shh"));
        assert_eq!(config.client.api_url, "https://api.example");
    }

    #[test]
    fn test_env_ignores_empty_and_unparsable_values() {
        let mut config = DependifyConfig::default();
        config.apply_env(env(&[("PORT", "not-a-port"), ("FRONTEND_URL", "  ")]));
        assert_eq!(config.server.port, 5001);
        assert_eq!(config.server.frontend_url, "http://localhost:3000");
    }

    #[test]
    fn test_unparsable_port_is_reported() {
        let mut config = DependifyConfig::default();
        config.apply_env(env(&[("PORT", "50O1"), ("RATE_LIMIT_PER_HOUR", "lots")]));
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("PORT") && w.contains("50O1")));
        assert!(warnings.iter().any(|w| w.contains("RATE_LIMIT_PER_HOUR")));

        let mut config = DependifyConfig::default();
        config.apply_env(env(&[("PORT", "8080")]));
        assert!(!config.validate().iter().any(|w| w.contains("PORT=")));
    }

    #[test]
    fn test_rate_limits_and_secret_from_env() {
        let mut config = DependifyConfig::default();
        assert_eq!(config.server.auth_rate_per_minute, 10);
        assert_eq!(config.server.jobs_rate_per_hour, 100);
        assert_eq!(config.finished_job_ttl(), Duration::from_secs(3600));

        config.apply_env(env(&[
            ("RATE_LIMIT_PER_MINUTE", "3"),
            ("RATE_LIMIT_PER_HOUR", "0"),
            ("API_SECRET_KEY", "k3y"),
        ]));
        assert_eq!(config.server.auth_rate_per_minute, 3);
        assert_eq!(config.server.jobs_rate_per_hour, 0);
        assert_eq!(config.server.api_secret_key.as_deref(), Some("k3y"));
    }

    #[test]
    fn test_feed_url_derived_from_api_url() {
        let mut config = DependifyConfig::default();
        assert_eq!(config.feed_url(), "ws://localhost:5001");

        config.client.api_url = "https://api.example/".into();
        assert_eq!(config.feed_url(), "wss://api.example");

        config.client.feed_url = Some("wss://feed.example/".into());
        assert_eq!(config.feed_url(), "wss://feed.example");
    }

    #[test]
    fn test_allowed_origins_include_local_dev() {
        let mut config = DependifyConfig::default();
        assert_eq!(
            config.allowed_origins(),
            vec!["http://localhost:3000", "http://127.0.0.1:3000"]
        );

        config.server.frontend_url = "https://dependify.example/".into();
        assert_eq!(
            config.allowed_origins(),
            vec![
                "https://dependify.example",
                "http://localhost:3000",
                "http://127.0.0.1:3000"
            ]
        );
    }

    #[test]
    fn test_validate_reports_missing_settings() {
        let config = DependifyConfig::default();
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("GITHUB_CLIENT_ID")));
        assert!(warnings.iter().any(|w| w.contains("PIPELINE_URL")));

        let mut config = DependifyConfig::default();
        config.apply_env(env(&[
            ("GITHUB_CLIENT_ID", "id"),
            ("GITHUB_CLIENT_SECRET", "secret"),
            ("PIPELINE_URL", "https://pipeline.example"),
            ("API_SECRET_KEY", "key"),
        ]));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_save_does_not_write_client_secret() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_DIR).join(CONFIG_FILE);
        let mut config = DependifyConfig::default();
        config.github.client_secret = Some("secret".into());
        config.server.api_secret_key = Some("signing-key".into());
        config.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("secret"));
        assert!(!content.contains("signing-key"));
        let loaded = DependifyConfig::load(&path).unwrap();
        assert_eq!(loaded.server.port, 5001);
    }

    #[test]
    fn test_session_file_override() {
        let mut config = DependifyConfig::default();
        config.client.session_file = Some(PathBuf::from("/tmp/s.json"));
        assert_eq!(config.session_file(), Some(PathBuf::from("/tmp/s.json")));
    }
}
