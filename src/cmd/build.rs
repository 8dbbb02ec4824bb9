//! The `build` subcommand.

use anyhow::anyhow;
use chrono::Local;
use clap::Args;

use crate::{
    artifact::{self, LogsDir, file_timestamp, human_timestamp},
    builder::{self, BuildOptions, BuildOutcome, SkipExisting},
    estimate::BatchEstimate,
    ident::prompt_fingerprint,
    prelude::*,
    prompt::PromptTemplate,
    request::RequestMode,
    ui::Ui,
};

use super::{ConfigOpts, DirOpts};

/// Build command line arguments.
#[derive(Args, Debug)]
pub struct BuildOpts {
    /// Explicit files to process, bypassing the input directory scan.
    #[clap(long, value_name = "PATH", num_args = 1..)]
    pub files: Vec<PathBuf>,

    /// Directory to scan for input files when no explicit files are given.
    #[clap(long, default_value = ".", value_name = "DIR")]
    pub input_dir: PathBuf,

    /// File extensions to pick up from the input directory. The default
    /// depends on the mode: documents for summary and embed, images for
    /// image, pdf for scan.
    #[clap(long, value_name = "EXT", value_delimiter = ',')]
    pub extensions: Option<Vec<String>>,

    /// What kind of batch to build.
    #[clap(long, value_enum, default_value = "summary")]
    pub mode: RequestMode,

    /// Path to the prompt template. Ignored in embed mode.
    #[clap(long, default_value = "prompt.txt", value_name = "PATH")]
    pub prompt: PathBuf,

    #[clap(flatten)]
    pub config: ConfigOpts,

    #[clap(flatten)]
    pub dirs: DirOpts,

    /// Override the model named in each request.
    #[clap(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Override the completion token cap per request.
    #[clap(long, value_name = "N")]
    pub max_tokens: Option<u32>,

    /// Chunk size: pages per request in scan mode, tokens per chunk in
    /// embed mode. Embed documents are sent whole when unset.
    #[clap(long, value_name = "N")]
    pub chunk_size: Option<usize>,

    /// Rasterization resolution for scan mode.
    #[clap(long, default_value = "150", value_name = "DPI")]
    pub dpi: u32,

    /// Rasterize PDFs even when they appear to have a text layer.
    #[clap(long)]
    pub force_scan: bool,

    /// Estimate and report without writing anything.
    #[clap(long)]
    pub dry_run: bool,

    /// Skip files whose output already exists from a prior run with the
    /// same prompt.
    #[clap(long)]
    pub skip_existing: bool,

    /// Proceed even when the estimate breaks a configured safety ceiling.
    #[clap(long)]
    pub force: bool,
}

/// The `build` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_build(ui: &Ui, opts: &BuildOpts) -> Result<()> {
    let config = opts.config.load().await?;

    let prompt = if opts.mode.is_chat() {
        let template = PromptTemplate::load(&opts.prompt).await?;
        template.render(config.output.summary_word_count)?
    } else {
        String::new()
    };

    let extensions = match &opts.extensions {
        Some(extensions) => extensions.clone(),
        None => default_extensions(opts.mode)
            .iter()
            .map(|&extension| extension.to_owned())
            .collect(),
    };
    let files = builder::discover_files(&opts.files, &opts.input_dir, &extensions)?;
    if files.is_empty() {
        ui.display_message("🤷", "No files found to process. Exiting.");
        return Ok(());
    }
    info!(files = files.len(), mode = %opts.mode, "Discovered input files");

    let fingerprint = prompt_fingerprint(&prompt);
    let logs_dir = opts.dirs.logs_dir();
    let previous_fingerprint = if opts.skip_existing {
        artifact::latest_prompt_fingerprint(&logs_dir).await?
    } else {
        None
    };

    let options = BuildOptions {
        mode: opts.mode,
        prompt: &prompt,
        config: &config,
        model: opts.model.as_deref(),
        max_tokens: opts.max_tokens,
        chunk_size: opts.chunk_size,
        dpi: opts.dpi,
        force_scan: opts.force_scan,
        skip_existing: opts.skip_existing.then(|| SkipExisting {
            output_dir: &opts.dirs.output_dir,
            fingerprint: &fingerprint,
            previous_fingerprint: previous_fingerprint.as_deref(),
        }),
    };
    let outcome = builder::build_requests(ui, &files, &options).await?;

    if !outcome.skipped.is_empty() {
        ui.display_message(
            "⏭️",
            &format!("Skipped {} files with existing output", outcome.skipped.len()),
        );
    }

    let estimate = BatchEstimate::new(
        outcome.records.len(),
        outcome.input_chars,
        options.resolved_max_tokens(),
        &options.resolved_model(),
        &config.pricing,
    );
    display_estimate(ui, &estimate);

    let violations = estimate.safety_violations(&config.safety);
    for violation in &violations {
        ui.display_message("🚨", &violation.to_string());
    }
    if !violations.is_empty() {
        if !opts.force {
            return Err(anyhow!(
                "estimated usage exceeds the configured safety limits; raise them in {:?} or re-run with --force",
                opts.config.config.display()
            ));
        }
        warn!("proceeding past safety limits because --force was given");
    }

    if opts.dry_run {
        ui.display_message("🌵", "Dry run; nothing written.");
        return Ok(());
    }

    if outcome.records.is_empty() && outcome.failures.is_empty() {
        ui.display_message("🤷", "No requests to write. Exiting.");
        return Ok(());
    }

    let timestamp = file_timestamp(Local::now());
    let logs = LogsDir::create(&logs_dir).await?;
    report_failures(ui, &logs, &timestamp, &outcome).await?;
    if outcome.records.is_empty() {
        ui.display_message("🤷", "No valid requests were built. Exiting.");
        return Ok(());
    }

    let artifact = logs.write_requests(&timestamp, &outcome.records).await?;
    logs.write_prompt_fingerprint(&timestamp, &fingerprint).await?;
    ui.display_message(
        "📦",
        &format!(
            "Wrote {} requests to {:?}",
            outcome.records.len(),
            artifact.display()
        ),
    );
    ui.display_message("🚀", "Review the artifact, then run `submit` to upload it.");
    Ok(())
}

/// Extensions scanned when `--extensions` is not given.
fn default_extensions(mode: RequestMode) -> &'static [&'static str] {
    match mode {
        RequestMode::Summary | RequestMode::Embed => &["txt", "md", "csv", "tsv", "pdf"],
        RequestMode::Image => &["jpg", "jpeg", "png"],
        RequestMode::Scan => &["pdf"],
    }
}

fn display_estimate(ui: &Ui, estimate: &BatchEstimate) {
    ui.display_message(
        "🧮",
        &format!("Requests to submit: {}", estimate.request_count),
    );
    ui.display_message(
        "🧮",
        &format!(
            "Estimated input tokens: {} ({} chars)",
            estimate.input_tokens, estimate.input_chars
        ),
    );
    ui.display_message(
        "🧮",
        &format!("Estimated output tokens: {}", estimate.output_tokens),
    );
    ui.display_message(
        "🧮",
        &format!("Estimated cost: ${:.4}", estimate.estimated_cost_usd),
    );
}

/// Write the error log and summarize it for the operator.
async fn report_failures(
    ui: &Ui,
    logs: &LogsDir,
    timestamp: &str,
    outcome: &BuildOutcome,
) -> Result<()> {
    let generated_at = human_timestamp(Local::now());
    let Some(error_log) = logs
        .write_error_log(timestamp, &generated_at, &outcome.failures)
        .await?
    else {
        return Ok(());
    };
    ui.display_message(
        "⚠️",
        &format!(
            "{} of {} files failed; reasons listed in {:?}",
            outcome.failures.len(),
            outcome.files_considered(),
            error_log.display()
        ),
    );
    Ok(())
}
