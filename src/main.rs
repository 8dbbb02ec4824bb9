use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod api;
mod artifact;
mod builder;
mod chunk;
mod cmd;
mod config;
mod data_url;
mod estimate;
mod extract;
mod ident;
mod io;
mod pages;
mod poll;
mod prelude;
mod prompt;
mod request;
mod results;
mod ui;

/// Prepare, submit and monitor batch inference jobs.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - OPENAI_API_BASE (optional): Override the configured server URL.
  - OPENAI_API_KEY: API token, needed by `submit`, `poll` and `process`.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Build a batch request artifact from input documents.
    Build(cmd::build::BuildOpts),
    /// Upload an artifact and create the batch job.
    Submit(cmd::submit::SubmitOpts),
    /// Poll a job until it finishes, then process its results.
    Poll(cmd::poll::PollOpts),
    /// Download and process the results of a completed job.
    Process(cmd::process::ProcessOpts),
    /// Print schemas for the wire and config formats.
    Schema(cmd::schema::SchemaOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Schema(opts) => opts.output_path.is_none(),
            _ => false,
        }
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);

    // We can stack multiple layers here if we need to.
    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Hide the progress bar if we're using stdout for output.
    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    // Run the appropriate subcommand.
    match &opts.subcmd {
        Cmd::Build(build_opts) => cmd::build::cmd_build(&ui, build_opts).await,
        Cmd::Submit(submit_opts) => cmd::submit::cmd_submit(&ui, submit_opts).await,
        Cmd::Poll(poll_opts) => cmd::poll::cmd_poll(&ui, poll_opts).await,
        Cmd::Process(process_opts) => cmd::process::cmd_process(&ui, process_opts).await,
        Cmd::Schema(schema_opts) => cmd::schema::cmd_schema(schema_opts).await,
    }
}
