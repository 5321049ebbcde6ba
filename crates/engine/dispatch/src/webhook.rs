//! Webhook agent
//!
//! POSTs the rendered job as JSON to the URL in the job's agent config
//! (`{"url": "..."}`). Server errors and transport failures are transient,
//! any other non-success status is permanent.

use async_trait::async_trait;
use chrono::Utc;
use engine_types::{Capabilities, Job, Shutdown};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

use crate::agent::{DispatchReceipt, Dispatchable, Verifiable, VerificationSpec};
use crate::error::{DispatchError, Result};

pub const WEBHOOK_AGENT_KIND: &str = "webhook";

#[derive(Debug, Clone)]
pub struct WebhookAgent {
    client: Client,
    /// Used when the job's agent config names no URL
    fallback_url: Option<String>,
}

impl WebhookAgent {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Permanent(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            fallback_url: None,
        })
    }

    pub fn with_fallback_url(mut self, url: impl Into<String>) -> Self {
        self.fallback_url = Some(url.into());
        self
    }

    fn url_for(&self, job: &Job) -> Result<String> {
        job.job_agent_config
            .get("url")
            .and_then(|u| u.as_str())
            .map(str::to_string)
            .or_else(|| self.fallback_url.clone())
            .ok_or_else(|| DispatchError::Permanent(format!("job {} has no webhook url", job.id)))
    }
}

fn classify(status: StatusCode, body: String) -> DispatchError {
    let message = format!("webhook returned {}: {}", status.as_u16(), body);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        DispatchError::Transient(message)
    } else {
        DispatchError::Permanent(message)
    }
}

#[async_trait]
impl Dispatchable for WebhookAgent {
    fn kind(&self) -> &str {
        WEBHOOK_AGENT_KIND
    }

    fn supports(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn dispatch(&self, job: &Job, mut shutdown: Shutdown) -> Result<DispatchReceipt> {
        let url = self.url_for(job)?;
        let request = self
            .client
            .post(&url)
            .header("Idempotency-Key", job.id.to_string())
            .json(job)
            .send();

        let response = tokio::select! {
            response = request => response,
            _ = shutdown.cancelled() => return Err(DispatchError::Cancelled),
        };
        let response = response.map_err(|e| {
            warn!(job_id = %job.id, url = %url, error = %e, "Webhook request failed");
            DispatchError::Transient(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, body));
        }

        debug!(job_id = %job.id, url = %url, status = status.as_u16(), "Webhook accepted job");
        Ok(DispatchReceipt::new(job, Utc::now()))
    }

    fn as_verifiable(&self) -> Option<&dyn Verifiable> {
        Some(self)
    }
}

impl Verifiable for WebhookAgent {
    /// Specs listed under `verifications` in the job's agent config
    fn verification_specs(&self, job: &Job) -> Result<Vec<VerificationSpec>> {
        match job.job_agent_config.get("verifications") {
            Some(specs) => Ok(serde_json::from_value(specs.clone())?),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode as AxumStatus, routing::post, Router};
    use chrono::DateTime;
    use engine_types::{JobAgentId, JobId, JobStatus, JobSubject, ReleaseTarget, VersionId};

    async fn serve(status: u16) -> String {
        let app = Router::new().route(
            "/hook",
            post(move || async move { AxumStatus::from_u16(status).unwrap() }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/hook")
    }

    fn job(config: serde_json::Value) -> Job {
        let at = DateTime::<Utc>::default();
        Job {
            id: JobId::derive(&["d1:e1:r1", "v1", "0"]),
            subject: JobSubject::Release {
                release_target: ReleaseTarget::new("d1", "e1", "r1"),
                version_id: VersionId::new("v1"),
                generation: 0,
            },
            job_agent_id: JobAgentId::new("hook"),
            agent_kind: WEBHOOK_AGENT_KIND.into(),
            job_agent_config: config,
            status: JobStatus::Pending,
            message: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn test_success_returns_receipt() {
        let url = serve(202).await;
        let agent = WebhookAgent::new(Duration::from_secs(5)).unwrap();
        let job = job(serde_json::json!({ "url": url }));
        let receipt = agent.dispatch(&job, Shutdown::never()).await.unwrap();
        assert_eq!(receipt.job_id, job.id);
    }

    #[tokio::test]
    async fn test_status_classification() {
        let agent = WebhookAgent::new(Duration::from_secs(5)).unwrap();

        let url = serve(503).await;
        let err = agent
            .dispatch(&job(serde_json::json!({ "url": url })), Shutdown::never())
            .await
            .unwrap_err();
        assert!(err.is_transient());

        let url = serve(422).await;
        let err = agent
            .dispatch(&job(serde_json::json!({ "url": url })), Shutdown::never())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let agent = WebhookAgent::new(Duration::from_secs(2)).unwrap();
        let err = agent
            .dispatch(
                &job(serde_json::json!({ "url": format!("http://{addr}/hook") })),
                Shutdown::never(),
            )
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_missing_url_is_permanent() {
        let agent = WebhookAgent::new(Duration::from_secs(1)).unwrap();
        let err = agent.url_for(&job(serde_json::Value::Null)).unwrap_err();
        assert!(matches!(err, DispatchError::Permanent(_)));
    }

    #[test]
    fn test_specs_come_from_agent_config() {
        let agent = WebhookAgent::new(Duration::from_secs(1)).unwrap();
        let job = job(serde_json::json!({
            "url": "http://localhost/hook",
            "verifications": [{ "name": "error-rate", "provider": "http", "count": 3 }]
        }));
        let specs = agent.verification_specs(&job).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].count, 3);
    }
}
