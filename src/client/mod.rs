//! Clients for the Dependify backend: OAuth code exchange, job submission
//! and the per-job progress feed.

pub mod auth;
pub mod feed;
pub mod submit;

pub use auth::{AuthResponse, BackendAuthClient, TokenExchange};
pub use feed::{
    FeedMessage, FeedTransport, ProgressSubscriber, SubscriberConfig, SubscriptionHandle,
    WsTransport,
};
pub use submit::SubmissionClient;

/// Join a base URL and a path without doubling slashes.
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
