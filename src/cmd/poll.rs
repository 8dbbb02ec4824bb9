//! The `poll` subcommand.

use std::{sync::Mutex, time::Duration};

use clap::Args;

use crate::{
    api::BatchClient,
    artifact,
    config::ApiKey,
    poll::run_poll_loop,
    prelude::*,
    ui::Ui,
};

use super::{ConfigOpts, DirOpts, process};

/// Poll command line arguments.
#[derive(Args, Debug)]
pub struct PollOpts {
    /// The job ID to poll. Defaults to the most recent marker in the logs
    /// directory.
    #[clap(value_name = "BATCH_ID")]
    pub batch_id: Option<String>,

    /// Seconds between status checks. Defaults to the configured interval.
    #[clap(long, value_name = "SECONDS")]
    pub interval: Option<u64>,

    /// The prompt file used at build time, consulted to decide whether
    /// outputs should parse as JSON. A missing file just disables the check.
    #[clap(long, default_value = "prompt.txt", value_name = "PATH")]
    pub prompt: PathBuf,

    #[clap(flatten)]
    pub config: ConfigOpts,

    #[clap(flatten)]
    pub dirs: DirOpts,
}

/// The `poll` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_poll(ui: &Ui, opts: &PollOpts) -> Result<()> {
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
    let interval =
        Duration::from_secs(opts.interval.unwrap_or(config.batch.polling_interval));

    // Ctrl-C should report where the job stood, so the fetch closure keeps
    // the last status it saw.
    let last_status = Mutex::new("unknown".to_owned());
    let poll_loop = run_poll_loop(ui, &batch_id, interval, || {
        let client = &client;
        let batch_id = batch_id.as_str();
        let last_status = &last_status;
        async move {
            let job = client.job_status(batch_id).await?;
            *last_status.lock().expect("lock poisoned") = job.status.to_string();
            Ok(job)
        }
    });
    let job = tokio::select! {
        result = poll_loop => result?,
        _ = tokio::signal::ctrl_c() => {
            ui.display_message(
                "🛑",
                &format!(
                    "Interrupted; job {} was last seen {}. Run `poll` again to resume.",
                    batch_id,
                    last_status.lock().expect("lock poisoned")
                ),
            );
            return Ok(());
        }
    };

    let expects_json = process::prompt_expects_json_hint(&opts.prompt, &config).await;
    process::finish_completed_job(ui, &client, &job, &opts.dirs.output_dir, expects_json)
        .await
}
