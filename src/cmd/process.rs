//! The `process` subcommand.

use anyhow::anyhow;
use chrono::Local;
use clap::Args;

use crate::{
    api::{BatchClient, BatchJob},
    artifact::{self, file_timestamp},
    config::{ApiKey, BatchConfig},
    poll::ensure_completed,
    prelude::*,
    prompt::PromptTemplate,
    results::{ProcessOutcome, process_results, prompt_expects_json},
    ui::{ProgressConfig, Ui},
};

use super::{ConfigOpts, DirOpts};

/// Process command line arguments.
#[derive(Args, Debug)]
pub struct ProcessOpts {
    /// The job ID to process. Defaults to the most recent marker in the
    /// logs directory.
    #[clap(value_name = "BATCH_ID")]
    pub batch_id: Option<String>,

    /// The prompt file used at build time, consulted to decide whether
    /// outputs should parse as JSON. A missing file just disables the check.
    #[clap(long, default_value = "prompt.txt", value_name = "PATH")]
    pub prompt: PathBuf,

    #[clap(flatten)]
    pub config: ConfigOpts,

    #[clap(flatten)]
    pub dirs: DirOpts,
}

/// The `process` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_process(ui: &Ui, opts: &ProcessOpts) -> Result<()> {
    let config = opts.config.load().await?;
    let api_key = ApiKey::from_env()?;

    let batch_id = match &opts.batch_id {
        Some(batch_id) => batch_id.clone(),
        None => {
            let (batch_id, marker) =
                artifact::latest_batch_id(&opts.dirs.logs_dir()).await?;
            info!(batch_id = %batch_id, marker = %marker.display(), "Using recorded job ID");
            batch_id
        }
    };

    let client = BatchClient::new(&config.api, &api_key);
    let job = client.job_status(&batch_id).await?;
    ensure_completed(&job)?;

    let expects_json = prompt_expects_json_hint(&opts.prompt, &config).await;
    finish_completed_job(ui, &client, &job, &opts.dirs.output_dir, expects_json).await
}

/// Download and process the results of a completed job. Shared with `poll`,
/// which runs this as soon as it sees the job complete.
pub async fn finish_completed_job(
    ui: &Ui,
    client: &BatchClient,
    job: &BatchJob,
    output_dir: &Path,
    expects_json: bool,
) -> Result<()> {
    let file_id = job
        .output_file_id
        .as_deref()
        .ok_or_else(|| anyhow!("job {} is completed but has no output file", job.id))?;
    if job.error_file_id.is_some() {
        warn!(batch_id = %job.id, "server reported a separate error file for some requests");
    }

    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "📥",
        msg: "Downloading results",
        done_msg: "Downloaded results",
    });
    let results = client.download_file(file_id).await?;
    drop(spinner);

    let timestamp = file_timestamp(Local::now());
    let outcome = process_results(ui, &results, output_dir, &timestamp, expects_json).await?;
    report_outcome(ui, &outcome);
    Ok(())
}

/// Whether outputs are expected to be JSON, judged from the build prompt.
///
/// An unreadable prompt file just disables the hint; embeddings batches have
/// no prompt at all.
pub async fn prompt_expects_json_hint(prompt_path: &Path, config: &BatchConfig) -> bool {
    let rendered = match PromptTemplate::load(prompt_path).await {
        Ok(template) => template.render(config.output.summary_word_count),
        Err(err) => {
            debug!("no prompt available for the JSON output hint: {:#}", err);
            return false;
        }
    };
    match rendered {
        Ok(prompt) => prompt_expects_json(&prompt),
        Err(err) => {
            debug!("could not render prompt for the JSON output hint: {:#}", err);
            false
        }
    }
}

/// Summarize what processing wrote, skipped and flagged.
fn report_outcome(ui: &Ui, outcome: &ProcessOutcome) {
    ui.display_message(
        "✅",
        &format!("Wrote {} output files", outcome.files_written.len()),
    );
    if !outcome.warnings.is_empty() {
        ui.display_message(
            "⚠️",
            &format!("{} outputs look suspicious:", outcome.warnings.len()),
        );
        for warning in &outcome.warnings {
            ui.display_message("⚠️", &format!("  {}: {}", warning.custom_id, warning.warning));
        }
    }
    if !outcome.failures.is_empty() {
        ui.display_message(
            "❌",
            &format!("{} records produced no output:", outcome.failures.len()),
        );
        for failure in &outcome.failures {
            ui.display_message("❌", &format!("  {}: {}", failure.custom_id, failure.reason));
        }
    }
}
