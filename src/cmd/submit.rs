//! The `submit` subcommand.

use anyhow::anyhow;
use chrono::Local;
use clap::Args;

use crate::{
    api::BatchClient,
    artifact::{self, LogsDir, file_timestamp},
    config::ApiKey,
    io::read_jsonl,
    prelude::*,
    request::BatchRequestRecord,
    ui::{ProgressConfig, Ui},
};

use super::{ConfigOpts, DirOpts};

/// Submit command line arguments.
#[derive(Args, Debug)]
pub struct SubmitOpts {
    /// The request artifact to upload. Defaults to the most recent one in
    /// the logs directory.
    #[clap(value_name = "ARTIFACT")]
    pub artifact: Option<PathBuf>,

    #[clap(flatten)]
    pub config: ConfigOpts,

    #[clap(flatten)]
    pub dirs: DirOpts,
}

/// The `submit` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_submit(ui: &Ui, opts: &SubmitOpts) -> Result<()> {
    let config = opts.config.load().await?;
    let api_key = ApiKey::from_env()?;
    ui.display_message("🔑", &format!("Using API token: {}", api_key.redacted()));

    let logs_dir = opts.dirs.logs_dir();
    let artifact_path = match &opts.artifact {
        Some(path) => path.clone(),
        None => artifact::latest_requests_artifact(&logs_dir).await?,
    };
    let (endpoint, request_count) = inspect_artifact(&artifact_path).await?;
    info!(
        artifact = %artifact_path.display(),
        requests = request_count,
        endpoint = %endpoint,
        "Submitting batch artifact"
    );
    ui.display_message(
        "📦",
        &format!(
            "Submitting {} requests from {}",
            request_count,
            artifact_path.display()
        ),
    );

    let client = BatchClient::new(&config.api, &api_key);
    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "📤",
        msg: "Uploading batch input file",
        done_msg: "Uploaded batch input file",
    });
    let file_id = client.upload_artifact(&artifact_path).await?;
    drop(spinner);

    let job = client
        .create_job(&file_id, &endpoint, &config.batch.completion_window)
        .await?;

    let logs = LogsDir::create(&logs_dir).await?;
    let timestamp = file_timestamp(Local::now());
    let marker = logs.write_batch_id(&timestamp, &job.id).await?;

    ui.display_message("🚀", &format!("Submitted batch job {}", job.id));
    ui.display_message(
        "📄",
        &format!(
            "Job ID recorded in {:?}; run `poll` to wait for completion",
            marker.display()
        ),
    );
    Ok(())
}

/// Read the artifact, check that every record parses as a batch request,
/// and return the endpoint from the first record plus the request count.
/// A chat artifact and an embeddings artifact each submit against the
/// endpoint they were built for, and a corrupt artifact fails here rather
/// than after upload.
async fn inspect_artifact(path: &Path) -> Result<(String, usize)> {
    let records: Vec<BatchRequestRecord> = read_jsonl(path).await?;
    let first = records
        .first()
        .ok_or_else(|| anyhow!("artifact {:?} is empty", path.display()))?;
    Ok((first.url.clone(), records.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::write_jsonl;

    #[tokio::test]
    async fn endpoint_and_count_come_from_the_artifact() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("batch_requests_20260825_143000.jsonl");
        let records = vec![
            BatchRequestRecord::embedding(
                "embed-a".to_owned(),
                "/v1/embeddings",
                "BAAI/bge-en-icl".to_owned(),
                "alpha".to_owned(),
            ),
            BatchRequestRecord::embedding(
                "embed-b".to_owned(),
                "/v1/embeddings",
                "BAAI/bge-en-icl".to_owned(),
                "beta".to_owned(),
            ),
        ];
        write_jsonl(&path, &records).await?;
        assert_eq!(
            inspect_artifact(&path).await?,
            ("/v1/embeddings".to_owned(), 2)
        );
        Ok(())
    }

    #[tokio::test]
    async fn empty_artifact_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("batch_requests_20260825_143000.jsonl");
        tokio::fs::write(&path, "\n").await?;
        let err = inspect_artifact(&path)
            .await
            .expect_err("an empty artifact has no endpoint");
        assert!(format!("{err}").contains("empty"));
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_artifact_is_rejected_before_upload() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("batch_requests_20260825_143000.jsonl");
        tokio::fs::write(&path, "{\"custom_id\":\"summary-alpha\"}\n").await?;
        let err = inspect_artifact(&path)
            .await
            .expect_err("records missing fields should not upload");
        assert!(format!("{err:?}").contains("line 1"));
        Ok(())
    }
}
