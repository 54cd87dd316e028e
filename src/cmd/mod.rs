//! CLI command implementations.
//!
//! | Module   | Commands handled                       |
//! |----------|----------------------------------------|
//! | `serve`  | `Serve`                                |
//! | `auth`   | `Auth login/callback/status/logout`    |
//! | `jobs`   | `Submit`, `Watch`, `Diff`              |
//! | `config` | `Config`                               |

pub mod auth;
pub mod config;
pub mod jobs;
pub mod serve;

pub use auth::cmd_auth;
pub use config::cmd_config;
pub use jobs::{DiffFormat, cmd_diff, cmd_submit, cmd_watch};
pub use serve::cmd_serve;

use anyhow::{Context, Result};
use dependify::config::DependifyConfig;
use dependify::session::SessionStore;

/// Open the session store configured for this invocation.
pub fn open_session(config: &DependifyConfig) -> Result<SessionStore> {
    match config.session_file() {
        Some(path) => SessionStore::open(&path)
            .with_context(|| format!("Failed to open session at {}", path.display())),
        None => Ok(SessionStore::in_memory()),
    }
}
