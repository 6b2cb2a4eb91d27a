//! Export job polling.
//!
//! The backend builds exports asynchronously. The client asks for a job id,
//! then polls `GET {api_base}/exports/{id}/` until the job completes or fails.

use std::time::Duration;

use async_trait::async_trait;
use dirasa_settings::ExportSettings;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// State of an export job as reported by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExportStatus {
    /// Queued.
    Pending,
    /// Being built.
    Processing,
    /// Ready for download.
    Completed {
        /// Where to download the file.
        file_url: String,
    },
    /// Gave up.
    Failed {
        /// Backend error message.
        #[serde(default)]
        error: String,
    },
}

impl ExportStatus {
    /// Whether polling should stop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Export polling failures.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The request did not complete or the body did not parse.
    #[error("export status request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The backend answered with a non-success status.
    #[error("export status request returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },
    /// The job itself failed.
    #[error("export job {job_id} failed: {error}")]
    JobFailed {
        /// Job id.
        job_id: String,
        /// Backend error message.
        error: String,
    },
    /// The job was still running after every attempt.
    #[error("export job {job_id} not finished after {attempts} attempts")]
    Exhausted {
        /// Job id.
        job_id: String,
        /// Attempts made.
        attempts: u32,
    },
    /// Polling was cancelled.
    #[error("export polling cancelled")]
    Cancelled,
}

/// Where job status comes from.
#[async_trait]
pub trait ExportJobSource: Send + Sync {
    /// Fetch the current status of a job.
    async fn fetch_status(&self, job_id: &str) -> Result<ExportStatus, ExportError>;
}

/// Fetches job status over HTTP.
#[derive(Clone, Debug)]
pub struct HttpExportJobSource {
    client: reqwest::Client,
    api_base_url: String,
    auth_token: Option<String>,
}

impl HttpExportJobSource {
    /// Source for an API base such as `https://api.example.com/api`.
    pub fn new(api_base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_base_url, auth_token)
    }

    /// Source for the API base configured in `export.apiBaseUrl`.
    pub fn from_settings(settings: &ExportSettings, auth_token: Option<String>) -> Self {
        Self::new(settings.api_base_url.clone(), auth_token)
    }

    /// Source sharing an existing client.
    pub fn with_client(
        client: reqwest::Client,
        api_base_url: impl Into<String>,
        auth_token: Option<String>,
    ) -> Self {
        let api_base_url: String = api_base_url.into();
        Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    fn status_url(&self, job_id: &str) -> String {
        format!("{}/exports/{job_id}/", self.api_base_url)
    }
}

#[async_trait]
impl ExportJobSource for HttpExportJobSource {
    async fn fetch_status(&self, job_id: &str) -> Result<ExportStatus, ExportError> {
        let mut request = self.client.get(self.status_url(job_id));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExportError::Status {
                status: status.as_u16(),
            });
        }
        Ok(response.json::<ExportStatus>().await?)
    }
}

/// How to poll.
#[derive(Clone, Copy, Debug)]
pub struct PollOptions {
    /// Delay between attempts.
    pub interval: Duration,
    /// Attempts before giving up. At least one attempt is always made.
    pub max_attempts: u32,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self::from(&ExportSettings::default())
    }
}

impl From<&ExportSettings> for PollOptions {
    fn from(settings: &ExportSettings) -> Self {
        Self {
            interval: Duration::from_millis(settings.poll_interval_ms),
            max_attempts: settings.max_attempts,
        }
    }
}

/// Poll until the job completes. Returns the download URL.
///
/// A failed fetch ends polling immediately; there is no retry.
#[instrument(skip(source, options, cancel))]
pub async fn poll_export_job(
    source: &dyn ExportJobSource,
    job_id: &str,
    options: PollOptions,
    cancel: &CancellationToken,
) -> Result<String, ExportError> {
    let attempts = options.max_attempts.max(1);
    for attempt in 1..=attempts {
        let status = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ExportError::Cancelled),
            status = source.fetch_status(job_id) => status?,
        };
        debug!(attempt, ?status, "export status");

        match status {
            ExportStatus::Completed { file_url } => {
                info!(attempt, "export ready");
                return Ok(file_url);
            }
            ExportStatus::Failed { error } => {
                warn!(%error, "export failed");
                return Err(ExportError::JobFailed {
                    job_id: job_id.to_string(),
                    error,
                });
            }
            ExportStatus::Pending | ExportStatus::Processing => {}
        }

        if attempt < attempts {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ExportError::Cancelled),
                () = tokio::time::sleep(options.interval) => {}
            }
        }
    }
    Err(ExportError::Exhausted {
        job_id: job_id.to_string(),
        attempts,
    })
}
