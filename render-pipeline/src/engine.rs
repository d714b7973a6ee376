use std::time::Duration;

use async_trait::async_trait;
use common::{error::AppError, utils::config::AppConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::classifier::ErrorKind;

/// Body of a job submission. Field names follow the engine's wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum JobRequest {
    Generate {
        prompt: String,
        #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
    Edit {
        code: String,
        prompt: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_video_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_video_id: Option<String>,
        #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
}

impl JobRequest {
    pub fn prompt(&self) -> &str {
        match self {
            JobRequest::Generate { prompt, .. } | JobRequest::Edit { prompt, .. } => prompt,
        }
    }

    fn path(&self) -> &'static str {
        match self {
            JobRequest::Generate { .. } => "generate",
            JobRequest::Edit { .. } => "edit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    /// Transient trouble talking to the engine. Never terminal.
    Error,
    #[serde(other)]
    Unknown,
}

/// One observation of a job, as returned by `GET /status/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusReport {
    pub status: EngineStatus,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
}

impl StatusReport {
    pub fn network_error(message: impl Into<String>) -> Self {
        Self {
            status: EngineStatus::Error,
            video_url: None,
            code: None,
            title: None,
            error: Some(message.into()),
            error_type: Some(ErrorKind::Network.code().to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
    status: EngineStatus,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Create a job and return the engine's id for it.
    async fn submit(&self, request: &JobRequest) -> Result<String, AppError>;

    /// Single status round trip. Transport failures come back as a
    /// `NETWORK_ERROR` report instead of an error.
    async fn poll(&self, job_id: &str) -> StatusReport;
}

pub struct HttpRenderEngine {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpRenderEngine {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Self::new(
            &config.render_engine_url,
            Duration::from_secs(config.engine_timeout_secs),
        )
    }

    fn status_url(&self, job_id: &str) -> Result<Url, AppError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| AppError::InternalError("render engine url cannot be a base".into()))?
            .pop_if_empty()
            .push("status")
            .push(job_id);
        Ok(url)
    }
}

#[async_trait]
impl RenderEngine for HttpRenderEngine {
    async fn submit(&self, request: &JobRequest) -> Result<String, AppError> {
        if request.prompt().trim().is_empty() {
            return Err(AppError::Validation("Prompt must not be empty".into()));
        }

        let url = self.base_url.join(request.path())?;
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|err| AppError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Submit(format!("engine answered {status}: {body}")));
        }

        let accepted: SubmitResponse = response
            .json()
            .await
            .map_err(|err| AppError::Submit(format!("unreadable engine response: {err}")))?;
        if accepted.id.trim().is_empty() {
            return Err(AppError::Submit("engine returned an empty job id".into()));
        }
        if accepted.status == EngineStatus::Failed {
            return Err(AppError::Submit(
                accepted
                    .error
                    .unwrap_or_else(|| "engine refused the job".into()),
            ));
        }

        debug!(job_id = %accepted.id, kind = request.path(), "render job submitted");
        Ok(accepted.id)
    }

    async fn poll(&self, job_id: &str) -> StatusReport {
        let url = match self.status_url(job_id) {
            Ok(url) => url,
            Err(err) => return StatusReport::network_error(err.to_string()),
        };

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(%job_id, error = %err, "status request failed");
                return StatusReport::network_error(err.to_string());
            }
        };

        let http_status = response.status();
        match response.json::<StatusReport>().await {
            Ok(report) => report,
            Err(err) => {
                warn!(%job_id, %http_status, error = %err, "unreadable status response");
                StatusReport::network_error(format!(
                    "unreadable status response ({http_status}): {err}"
                ))
            }
        }
    }
}
