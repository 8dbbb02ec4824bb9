//! Client for the batch endpoints of OpenAI-compatible APIs.
//!
//! File upload and download go through the typed `async-openai` bindings.
//! The batch job calls use the raw-JSON (`byot`) variants instead: the typed
//! bindings pin `completion_window` to a fixed enum, and gateways accept
//! windows the enum can't express, so we keep our own job types and let
//! unknown statuses and vendor extras pass through.

use std::fmt;

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{CreateFileRequestArgs, FilePurpose},
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    config::{API_BASE_VAR, ApiConfig, ApiKey},
    prelude::*,
};

/// Client for one OpenAI-compatible server.
pub struct BatchClient {
    /// The underlying OpenAI client.
    client: Client<OpenAIConfig>,
}

impl BatchClient {
    /// Create a client from our configuration and token.
    ///
    /// `OPENAI_API_BASE` overrides the configured base URL, for pointing a
    /// run at a staging gateway without editing the config file.
    pub fn new(api: &ApiConfig, api_key: &ApiKey) -> Self {
        let mut base_url = api.base_url.clone();
        if let Ok(base) = std::env::var(API_BASE_VAR) {
            base_url = base;
        }
        let client_config = OpenAIConfig::new()
            .with_api_key(api_key.reveal())
            .with_api_base(base_url);
        Self {
            client: Client::with_config(client_config),
        }
    }

    /// Upload a request artifact as a batch input file, returning the file
    /// ID.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn upload_artifact(&self, path: &Path) -> Result<String> {
        let request = CreateFileRequestArgs::default()
            .file(path)
            .purpose(FilePurpose::Batch)
            .build()
            .context("failed to build file upload request")?;
        let file = self.client.files().create(request).await.with_context(|| {
            format!("failed to upload batch input file {:?}", path.display())
        })?;
        debug!(file_id = %file.id, "Uploaded batch input file");
        Ok(file.id)
    }

    /// Create a batch job over an uploaded input file.
    #[instrument(
        level = "debug",
        skip_all,
        fields(input_file_id = %input_file_id, endpoint = %endpoint)
    )]
    pub async fn create_job(
        &self,
        input_file_id: &str,
        endpoint: &str,
        completion_window: &str,
    ) -> Result<BatchJob> {
        let request = json!({
            "input_file_id": input_file_id,
            "endpoint": endpoint,
            "completion_window": completion_window,
        });
        let job: BatchJob = self
            .client
            .batches()
            .create_byot(request)
            .await
            .context("failed to create batch job")?;
        info!(batch_id = %job.id, status = %job.status, "Created batch job");
        Ok(job)
    }

    /// Fetch the current state of a batch job.
    pub async fn job_status(&self, batch_id: &str) -> Result<BatchJob> {
        let job: BatchJob = self
            .client
            .batches()
            .retrieve_byot(batch_id)
            .await
            .with_context(|| format!("failed to fetch status for job {batch_id}"))?;
        Ok(job)
    }

    /// Download a file's contents as UTF-8 text.
    #[instrument(level = "debug", skip_all, fields(file_id = %file_id))]
    pub async fn download_file(&self, file_id: &str) -> Result<String> {
        let bytes = self
            .client
            .files()
            .content(file_id)
            .await
            .with_context(|| format!("failed to download file {file_id}"))?;
        String::from_utf8(bytes.to_vec())
            .with_context(|| format!("file {file_id} was not valid UTF-8"))
    }
}

/// A batch job, as reported by the server.
#[derive(Clone, Debug, Deserialize, JsonSchema)]
pub struct BatchJob {
    /// The job ID.
    pub id: String,

    /// Current lifecycle status.
    pub status: BatchStatus,

    /// Per-request progress counts. Absent until validation finishes.
    #[serde(default)]
    pub request_counts: Option<BatchRequestCounts>,

    /// File ID of the JSONL results. Present once the job completes.
    #[serde(default)]
    pub output_file_id: Option<String>,

    /// File ID of per-request errors, if any requests failed outright.
    #[serde(default)]
    pub error_file_id: Option<String>,

    /// Job-level errors reported by the server.
    #[serde(default)]
    pub errors: Option<Value>,
}

/// Per-request progress counts for a job.
#[derive(Clone, Copy, Debug, Default, Deserialize, JsonSchema)]
pub struct BatchRequestCounts {
    /// Requests in the batch.
    pub total: u64,

    /// Requests finished successfully so far.
    pub completed: u64,

    /// Requests that failed.
    pub failed: u64,
}

/// Batch job lifecycle states.
#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// The input file is being validated.
    Validating,
    /// Waiting for capacity.
    Queued,
    /// Requests are running.
    InProgress,
    /// Results are being assembled.
    Finalizing,
    /// Done, results ready to download.
    Completed,
    /// The job failed as a whole.
    Failed,
    /// The completion window elapsed before the job finished.
    Expired,
    /// Cancellation requested but not finished.
    Cancelling,
    /// Cancelled by the operator.
    Cancelled,
    /// A status this build doesn't know. Treated as still in flight.
    #[serde(other)]
    Other,
}

impl BatchStatus {
    /// Has the job reached a state it will never leave?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Completed
                | BatchStatus::Failed
                | BatchStatus::Expired
                | BatchStatus::Cancelled
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchStatus::Validating => "validating",
            BatchStatus::Queued => "queued",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Finalizing => "finalizing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Expired => "expired",
            BatchStatus::Cancelling => "cancelling",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Other => "unknown",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_from_snake_case() {
        let status: BatchStatus =
            serde_json::from_str("\"in_progress\"").expect("should parse");
        assert_eq!(status, BatchStatus::InProgress);
    }

    #[test]
    fn unknown_status_is_not_terminal() {
        let status: BatchStatus =
            serde_json::from_str("\"some_future_state\"").expect("should parse");
        assert_eq!(status, BatchStatus::Other);
        assert!(!status.is_terminal());
    }

    #[test]
    fn terminal_states_are_exactly_the_four_final_ones() {
        for (status, terminal) in [
            (BatchStatus::Validating, false),
            (BatchStatus::Queued, false),
            (BatchStatus::InProgress, false),
            (BatchStatus::Finalizing, false),
            (BatchStatus::Completed, true),
            (BatchStatus::Failed, true),
            (BatchStatus::Expired, true),
            (BatchStatus::Cancelling, false),
            (BatchStatus::Cancelled, true),
        ] {
            assert_eq!(status.is_terminal(), terminal, "status {status}");
        }
    }

    #[test]
    fn job_parses_with_and_without_counts() {
        let early: BatchJob = serde_json::from_value(serde_json::json!({
            "id": "batch_abc123",
            "object": "batch",
            "status": "validating",
        }))
        .expect("should parse");
        assert_eq!(early.id, "batch_abc123");
        assert!(early.request_counts.is_none());
        assert!(early.output_file_id.is_none());

        let done: BatchJob = serde_json::from_value(serde_json::json!({
            "id": "batch_abc123",
            "object": "batch",
            "status": "completed",
            "request_counts": {"total": 3, "completed": 3, "failed": 0},
            "output_file_id": "file-xyz",
        }))
        .expect("should parse");
        assert_eq!(done.status, BatchStatus::Completed);
        let counts = done.request_counts.expect("counts should be present");
        assert_eq!(counts.total, 3);
        assert_eq!(done.output_file_id.as_deref(), Some("file-xyz"));
    }
}
