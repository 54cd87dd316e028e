//! Dependify: submit a GitHub repository for modernization, follow the
//! pipeline live, and review the resulting changes.

pub mod client;
pub mod config;
pub mod dashboard;
pub mod diff;
pub mod errors;
pub mod github;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod ui;
