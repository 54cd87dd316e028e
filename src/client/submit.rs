use dependify_common::{Job, JobId, RepoRef};
use serde::{Deserialize, Serialize};

use super::endpoint;
use crate::errors::{NetworkError, SubmitError};
use crate::github::check_status;

#[derive(Debug, Serialize)]
struct SubmitRequest {
    repository: String,
}

/// Body returned by `POST /api/jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
}

/// Sends repository references to the backend. Never retries on its own.
#[derive(Debug, Clone)]
pub struct SubmissionClient {
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl SubmissionClient {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            token: None,
        }
    }

    /// Attach a bearer token to every request.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Submit a repository for modernization.
    ///
    /// The reference is shape-checked first; a malformed one fails with
    /// [`SubmitError::Validation`] and nothing is sent.
    pub async fn submit(&self, reference: &str) -> Result<JobId, SubmitError> {
        let repo = RepoRef::parse(reference)?;
        let url = endpoint(&self.api_url, "/api/jobs");
        tracing::info!(repository = %repo, "submitting job");

        let resp = self
            .authorize(self.http.post(&url))
            .json(&SubmitRequest {
                repository: repo.to_string(),
            })
            .send()
            .await
            .map_err(|source| NetworkError::Unreachable {
                endpoint: url.clone(),
                source,
            })?;
        let body = check_status(&url, resp)
            .await?
            .json::<SubmitResponse>()
            .await
            .map_err(|source| NetworkError::Decode {
                endpoint: url,
                source,
            })?;
        tracing::info!(job_id = %body.job_id, "job accepted");
        Ok(body.job_id)
    }

    /// Current snapshot of a job.
    pub async fn fetch_job(&self, job_id: &JobId) -> Result<Job, NetworkError> {
        let url = endpoint(&self.api_url, &format!("/api/jobs/{}", job_id));
        let resp = self
            .authorize(self.http.get(&url))
            .send()
            .await
            .map_err(|source| NetworkError::Unreachable {
                endpoint: url.clone(),
                source,
            })?;
        check_status(&url, resp)
            .await?
            .json::<Job>()
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
        routing::post,
    };
    use dependify_common::RepoRefError;

    async fn spawn_backend(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_malformed_reference_is_rejected_before_sending() {
        // Port 1 is never listening; a request would surface as Network.
        let client = SubmissionClient::new("http://127.0.0.1:1");
        let err = client.submit("not a repo").await.unwrap_err();
        assert!(matches!(err, SubmitError::Validation(_)));

        let err = client.submit("").await.unwrap_err();
        assert!(matches!(err, SubmitError::Validation(RepoRefError::Empty)));
    }

    #[tokio::test]
    async fn test_submit_returns_job_id_and_sends_token() {
        let app = Router::new().route(
            "/api/jobs",
            post(
                |headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                    assert_eq!(body["repository"], "octocat/hello-world");
                    assert_eq!(
                        headers.get("authorization").unwrap().to_str().unwrap(),
                        "Bearer gho_abc"
                    );
                    (
                        StatusCode::CREATED,
                        Json(serde_json::json!({"job_id": "job-42"})),
                    )
                },
            ),
        );
        let base = spawn_backend(app).await;
        let client = SubmissionClient::new(base).with_token(Some("gho_abc".into()));
        let job_id = client
            .submit("https://github.com/octocat/hello-world.git")
            .await
            .unwrap();
        assert_eq!(job_id.as_str(), "job-42");
    }

    #[tokio::test]
    async fn test_non_success_status_is_network_error() {
        let app = Router::new().route(
            "/api/jobs",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        );
        let base = spawn_backend(app).await;
        let err = SubmissionClient::new(base)
            .submit("octocat/hello-world")
            .await
            .unwrap_err();
        match err {
            SubmitError::Network(net) => assert_eq!(net.status_code(), Some(503)),
            other => panic!("expected network error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        let err = SubmissionClient::new("http://127.0.0.1:1")
            .submit("octocat/hello-world")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Network(NetworkError::Unreachable { .. })
        ));
    }
}
