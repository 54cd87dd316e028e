//! Hand-off of new jobs to the external modernization pipeline.

use async_trait::async_trait;
use dependify_common::{Job, JobId};
use serde::Serialize;

use crate::client::endpoint;
use crate::errors::NetworkError;
use crate::github::check_status;

/// What a pipeline worker needs to start on a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchRequest {
    pub job_id: JobId,
    pub repository: String,
    pub clone_url: String,
    /// Where the worker POSTs progress events.
    pub events_url: String,
}

impl DispatchRequest {
    pub fn for_job(job: &Job, public_url: &str) -> Self {
        Self {
            job_id: job.job_id.clone(),
            repository: job.repository.to_string(),
            clone_url: job.repository.clone_url(),
            events_url: endpoint(public_url, &format!("/api/jobs/{}/events", job.job_id)),
        }
    }
}

#[async_trait]
pub trait PipelineDispatcher: Send + Sync {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<(), NetworkError>;
}

/// POSTs the request as JSON to a pipeline endpoint.
pub struct WebhookDispatcher {
    http: reqwest::Client,
    url: String,
}

impl WebhookDispatcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl PipelineDispatcher for WebhookDispatcher {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<(), NetworkError> {
        let resp = self
            .http
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|source| NetworkError::Unreachable {
                endpoint: self.url.clone(),
                source,
            })?;
        check_status(&self.url, resp).await?;
        tracing::info!(job_id = %request.job_id, pipeline = %self.url, "job dispatched");
        Ok(())
    }
}

/// Used when no pipeline is configured; jobs stay queued.
pub struct NoopDispatcher;

#[async_trait]
impl PipelineDispatcher for NoopDispatcher {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<(), NetworkError> {
        tracing::warn!(
            job_id = %request.job_id,
            "no pipeline configured; job will stay queued"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use chrono::Utc;
    use dependify_common::RepoRef;
    use std::sync::{Arc, Mutex};

    fn job() -> Job {
        Job::new(
            JobId::new("job-7"),
            RepoRef::parse("octocat/hello").unwrap(),
            Utc::now(),
        )
    }

    #[test]
    fn test_request_for_job() {
        let req = DispatchRequest::for_job(&job(), "https://hub.example/");
        assert_eq!(req.repository, "octocat/hello");
        assert_eq!(req.clone_url, "https://github.com/octocat/hello.git");
        assert_eq!(req.events_url, "https://hub.example/api/jobs/job-7/events");
    }

    #[tokio::test]
    async fn test_webhook_posts_request() {
        let seen: Arc<Mutex<Vec<serde_json::Value>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let app = Router::new().route(
            "/run",
            post(move |Json(body): Json<serde_json::Value>| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(body);
                    StatusCode::ACCEPTED
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let dispatcher = WebhookDispatcher::new(format!("http://{}/run", addr));
        let req = DispatchRequest::for_job(&job(), "http://localhost:5001");
        dispatcher.dispatch(&req).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["job_id"], "job-7");
        assert_eq!(seen[0]["clone_url"], "https://github.com/octocat/hello.git");
    }

    #[tokio::test]
    async fn test_webhook_unreachable() {
        let dispatcher = WebhookDispatcher::new("http://127.0.0.1:1/run");
        let req = DispatchRequest::for_job(&job(), "http://localhost:5001");
        assert!(dispatcher.dispatch(&req).await.is_err());
    }

    #[tokio::test]
    async fn test_noop_dispatcher_succeeds() {
        let req = DispatchRequest::for_job(&job(), "http://localhost:5001");
        assert!(NoopDispatcher.dispatch(&req).await.is_ok());
    }
}
