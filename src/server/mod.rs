//! Progress hub: OAuth code exchange, job intake, event ingestion and the
//! per-job WebSocket feed.

pub mod api;
pub mod dispatch;
pub mod hub;
pub mod limit;
pub mod token;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Router,
    http::{HeaderValue, Method, header},
};
use tower_http::cors::CorsLayer;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::DependifyConfig;
use crate::github::OAuthApp;
use api::{AppState, SharedState};
use dispatch::{NoopDispatcher, PipelineDispatcher, WebhookDispatcher};
use hub::JobHub;
use limit::RateLimits;
use token::{TOKEN_TTL_HOURS, TokenIssuer};

/// How often finished jobs and idle rate-limit entries are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Runtime settings for the hub.
pub struct ServerConfig {
    pub port: u16,
    pub dev_mode: bool,
    pub allowed_origins: Vec<String>,
}

impl ServerConfig {
    pub fn from_config(config: &DependifyConfig, dev_mode: bool) -> Self {
        Self {
            port: config.server.port,
            dev_mode,
            allowed_origins: config.allowed_origins(),
        }
    }
}

/// Build the state the handlers share from resolved configuration.
pub fn build_state(config: &DependifyConfig) -> SharedState {
    let dispatcher: Box<dyn PipelineDispatcher> = match &config.server.pipeline_url {
        Some(url) => Box::new(WebhookDispatcher::new(url.clone())),
        None => Box::new(NoopDispatcher),
    };
    let oauth = match (&config.github.client_id, &config.github.client_secret) {
        (Some(id), Some(secret)) => Some(OAuthApp::new(id.clone(), secret.clone())),
        _ => None,
    };
    let tokens = match &config.server.api_secret_key {
        Some(secret) => TokenIssuer::new(
            secret.as_bytes(),
            chrono::TimeDelta::hours(TOKEN_TTL_HOURS),
        ),
        None => TokenIssuer::ephemeral(),
    };
    Arc::new(AppState {
        hub: JobHub::new(config.server.feed_capacity, config.finished_job_ttl()),
        dispatcher,
        oauth,
        http: reqwest::Client::new(),
        public_url: config.public_url(),
        tokens,
        limits: RateLimits::new(
            config.server.auth_rate_per_minute,
            config.server.jobs_rate_per_hour,
        ),
    })
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    if config.dev_mode {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

pub fn build_router(state: SharedState, config: &ServerConfig) -> Router {
    api::api_router()
        .with_state(state)
        .layer(cors_layer(config))
        .layer(TraceLayer::new_for_http())
}

/// Run the hub until Ctrl+C.
pub async fn start_server(config: &DependifyConfig, dev_mode: bool) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let server_config = ServerConfig::from_config(config, dev_mode);
    let state = build_state(config);
    let app = build_router(Arc::clone(&state), &server_config);

    let host = if dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, server_config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, dev_mode, "progress hub listening");

    let cancel = CancellationToken::new();
    let sweeper = tokio::spawn(sweep_loop(state, SWEEP_INTERVAL, cancel.clone()));

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error");

    cancel.cancel();
    let _ = sweeper.await;
    served?;

    tracing::info!("progress hub shut down");
    Ok(())
}

/// Evict expired jobs and compact rate-limit state until cancelled.
async fn sweep_loop(state: SharedState, every: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                state.hub.sweep();
                state.limits.compact();
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{FeedMessage, ProgressSubscriber, SubscriberConfig, WsTransport};
    use crate::dashboard::JobTracker;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use dependify_common::{FileResult, JobStatus, ProgressEvent, RepoRef, StatusPayload};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn server_config(dev_mode: bool) -> ServerConfig {
        ServerConfig::from_config(&DependifyConfig::default(), dev_mode)
    }

    #[tokio::test]
    async fn test_cors_allows_configured_origin() {
        let router = build_router(
            build_state(&DependifyConfig::default()),
            &server_config(false),
        );
        let req = Request::builder()
            .uri("/health")
            .header("origin", "http://127.0.0.1:3000")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "http://127.0.0.1:3000"
        );
    }

    #[tokio::test]
    async fn test_cors_rejects_unknown_origin() {
        let router = build_router(
            build_state(&DependifyConfig::default()),
            &server_config(false),
        );
        let req = Request::builder()
            .uri("/health")
            .header("origin", "https://evil.example")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert!(resp.headers().get("access-control-allow-origin").is_none());
    }

    #[test]
    fn test_build_state_without_oauth() {
        let state = build_state(&DependifyConfig::default());
        assert!(state.oauth.is_none());
        assert_eq!(state.public_url, "http://localhost:5001");
    }

    #[test]
    fn test_configured_secret_outlives_state() {
        let mut config = DependifyConfig::default();
        config.server.api_secret_key = Some("shared".into());
        let user = crate::github::GitHubUser {
            id: 1,
            login: "octocat".into(),
            name: None,
            email: None,
            avatar_url: None,
        };
        let token = build_state(&config)
            .tokens
            .issue(&user, chrono::Utc::now())
            .unwrap();
        assert!(build_state(&config).tokens.verify(&token).is_ok());
        assert!(
            build_state(&DependifyConfig::default())
                .tokens
                .verify(&token)
                .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_loop_evicts_finished_jobs() {
        let mut config = DependifyConfig::default();
        config.server.finished_job_ttl_secs = 0;
        let state = build_state(&config);
        let id = state
            .hub
            .create_job(RepoRef::parse("octocat/hello").unwrap())
            .unwrap()
            .job_id;
        state
            .hub
            .publish(&ProgressEvent::status(
                id.clone(),
                StatusPayload::new(JobStatus::Failed),
            ))
            .unwrap();

        let cancel = CancellationToken::new();
        let sweeper = tokio::spawn(sweep_loop(
            Arc::clone(&state),
            Duration::from_secs(60),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(state.hub.get(&id).is_err());

        cancel.cancel();
        sweeper.await.unwrap();
    }

    async fn next_message(rx: &mut mpsc::UnboundedReceiver<FeedMessage>) -> FeedMessage {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for feed message")
            .expect("subscription ended")
    }

    #[tokio::test]
    async fn test_feed_replays_snapshot_then_streams_live_events() {
        let state = build_state(&DependifyConfig::default());
        let job = state
            .hub
            .create_job(RepoRef::parse("octocat/hello").unwrap())
            .unwrap();
        let id = job.job_id.clone();
        state
            .hub
            .publish(&ProgressEvent::status(
                id.clone(),
                StatusPayload::new(JobStatus::Analyzing),
            ))
            .unwrap();

        let router = build_router(Arc::clone(&state), &server_config(false));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let subscriber = ProgressSubscriber::new(
            WsTransport::new(format!("ws://{}", addr)),
            SubscriberConfig {
                max_attempts: 1,
                backoff: Duration::from_millis(10),
            },
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = subscriber.subscribe(id.clone(), move |msg| {
            let _ = tx.send(msg);
        });

        let mut tracker = JobTracker::new(job);

        assert_eq!(next_message(&mut rx).await, FeedMessage::Connected);
        tracker.handle(next_message(&mut rx).await);
        assert_eq!(tracker.job().status, JobStatus::Analyzing);

        state
            .hub
            .publish(&ProgressEvent::file(
                id.clone(),
                &FileResult::new("a.js", "var a;\n", "let a;\n"),
            ))
            .unwrap();
        state
            .hub
            .publish(&ProgressEvent::status(
                id.clone(),
                StatusPayload {
                    pull_request_url: Some("https://github.com/octocat/hello/pull/1".into()),
                    ..StatusPayload::new(JobStatus::Opened)
                },
            ))
            .unwrap();

        tracker.handle(next_message(&mut rx).await);
        tracker.handle(next_message(&mut rx).await);
        assert!(tracker.is_finished());
        let view = tracker.diff_view().unwrap();
        assert_eq!(view.files_changed(), 1);
        assert_eq!(
            view.pull_request_url(),
            Some("https://github.com/octocat/hello/pull/1")
        );

        subscriber.unsubscribe(handle).await;
    }
}
