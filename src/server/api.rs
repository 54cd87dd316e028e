use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use dependify_common::{
    EventType, Job, JobId, JobStatus, ProgressEvent, RepoRef, StatusPayload,
};
use serde::{Deserialize, Serialize};

use chrono::Utc;

use super::dispatch::{DispatchRequest, PipelineDispatcher};
use super::hub::JobHub;
use super::limit::{ClientIp, RateLimits};
use super::token::{self, Claims, TokenIssuer};
use super::ws;
use crate::errors::{AuthError, HubError};
use crate::github::{GitHubUser, OAuthApp};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub hub: JobHub,
    pub dispatcher: Box<dyn PipelineDispatcher>,
    /// `None` when the OAuth client id/secret are not configured.
    pub oauth: Option<OAuthApp>,
    pub http: reqwest::Client,
    /// Base URL pipeline workers use to post events back.
    pub public_url: String,
    pub tokens: TokenIssuer,
    pub limits: RateLimits,
}

pub type SharedState = Arc<AppState>;

// ── Request / response types ──────────────────────────────────────────

#[derive(Deserialize)]
pub struct AuthRequest {
    pub code: String,
}

/// `access_token` is a hub-signed JWT, not the GitHub token.
#[derive(Serialize)]
pub struct AuthResponseBody {
    pub access_token: String,
    pub token_type: &'static str,
    pub user: GitHubUser,
}

#[derive(Serialize)]
pub struct MeResponse {
    pub user: GitHubUser,
}

#[derive(Deserialize)]
pub struct CreateJobRequest {
    pub repository: String,
}

#[derive(Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub job_id: JobId,
}

#[derive(Deserialize)]
pub struct EventRequest {
    pub event_type: EventType,
    #[serde(default)]
    pub payload: serde_json::Value,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    TooManyRequests(String),
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::JobNotFound { .. } => ApiError::NotFound(err.to_string()),
            HubError::InvalidReference(_) | HubError::InvalidEvent(_) => {
                ApiError::BadRequest(err.to_string())
            }
            HubError::LockPoisoned => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NotConfigured | AuthError::Session(_) | AuthError::Signing(_) => {
                ApiError::Internal(err.to_string())
            }
            AuthError::Network(_) => ApiError::BadGateway(err.to_string()),
            AuthError::MissingToken | AuthError::InvalidToken(_) | AuthError::TokenExpired => {
                ApiError::Unauthorized(err.to_string())
            }
            AuthError::Denied(_)
            | AuthError::MissingCode
            | AuthError::StateMismatch
            | AuthError::GitHub(_) => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/auth/github", post(github_auth))
        .route("/auth/me", get(auth_me))
        .route("/api/jobs", post(create_job))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/jobs/{id}/events", post(post_event))
        .route("/ws/jobs/{id}", get(ws::job_feed))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Verify the request's bearer token. `Ok(None)` when no token was sent.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Option<Claims>, AuthError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let token = value
        .to_str()
        .ok()
        .and_then(token::bearer)
        .ok_or_else(|| AuthError::InvalidToken("expected a bearer token".into()))?;
    state.tokens.verify(token).map(Some)
}

async fn github_auth(
    State(state): State<SharedState>,
    ClientIp(ip): ClientIp,
    body: Result<Json<AuthRequest>, JsonRejection>,
) -> Result<Json<AuthResponseBody>, ApiError> {
    state.limits.check_auth(ip)?;
    let Json(req) = body?;
    let oauth = state.oauth.as_ref().ok_or(AuthError::NotConfigured)?;
    if req.code.trim().is_empty() {
        return Err(AuthError::MissingCode.into());
    }
    let grant = oauth.exchange_code(&state.http, &req.code).await?;
    let access_token = state.tokens.issue(&grant.user, Utc::now())?;
    Ok(Json(AuthResponseBody {
        access_token,
        token_type: "bearer",
        user: grant.user,
    }))
}

async fn auth_me(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, ApiError> {
    let claims = authenticate(&state, &headers)?.ok_or(AuthError::MissingToken)?;
    Ok(Json(MeResponse { user: claims.user }))
}

async fn create_job(
    State(state): State<SharedState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    body: Result<Json<CreateJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateJobResponse>), ApiError> {
    state.limits.check_jobs(ip)?;
    // Sign-in is optional for intake; a bad token is treated as anonymous.
    let submitter = match authenticate(&state, &headers) {
        Ok(claims) => claims.map(|c| c.user.login),
        Err(e) => {
            tracing::debug!(error = %e, "ignoring unusable bearer token on job intake");
            None
        }
    };
    let Json(req) = body?;
    let repository = RepoRef::parse(&req.repository).map_err(HubError::from)?;
    let job = state.hub.create_job(repository)?;
    if let Some(login) = &submitter {
        tracing::info!(job_id = %job.job_id, %login, "job submitted by signed-in user");
    }

    let request = DispatchRequest::for_job(&job, &state.public_url);
    if let Err(e) = state.dispatcher.dispatch(&request).await {
        tracing::error!(job_id = %job.job_id, error = %e, "pipeline dispatch failed");
        let failed = ProgressEvent::status(
            job.job_id.clone(),
            StatusPayload {
                error: Some(format!("Failed to start the pipeline: {}", e)),
                ..StatusPayload::new(JobStatus::Failed)
            },
        );
        state.hub.publish(&failed)?;
    }

    Ok((
        StatusCode::CREATED,
        Json(CreateJobResponse { job_id: job.job_id }),
    ))
}

async fn get_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.hub.get(&JobId::new(id))?))
}

async fn post_event(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    body: Result<Json<EventRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(req) = body?;
    let event = ProgressEvent {
        job_id: JobId::new(id),
        event_type: req.event_type,
        payload: req.payload,
    };
    let applied = state.hub.publish(&event)?;
    Ok(Json(serde_json::json!({ "applied": applied.changed() })))
}

// ── Tests ─────────────────────────────────────────────────────────────
