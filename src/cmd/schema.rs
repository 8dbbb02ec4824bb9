//! The `schema` subcommand.

use clap::{Args, ValueEnum};
use schemars::schema_for;
use tokio::io::AsyncWriteExt as _;

use crate::{
    api::BatchJob, config::BatchConfig, io::create_writer, prelude::*,
    request::BatchRequestRecord, results::ResultRecord,
};

/// The different schema types we support.
///
/// We parse these as PascalCase, because they represent type names.
#[derive(Clone, Copy, Debug, ValueEnum)]
#[clap(rename_all = "PascalCase")]
pub enum SchemaType {
    /// One line of the uploaded request artifact.
    BatchRequest,
    /// One line of the downloaded results file.
    BatchResult,
    /// A batch job as reported by the server.
    BatchJob,
    /// The TOML configuration file.
    Config,
}

/// Schema command line arguments.
#[derive(Args, Debug)]
pub struct SchemaOpts {
    /// The schema type to generate.
    #[clap(value_enum, value_name = "TYPE")]
    pub schema_type: SchemaType,

    /// The output path to write the schema to.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// The `schema` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_schema(schema_opts: &SchemaOpts) -> Result<()> {
    let schema = match schema_opts.schema_type {
        SchemaType::BatchRequest => schema_for!(BatchRequestRecord),
        SchemaType::BatchResult => schema_for!(ResultRecord),
        SchemaType::BatchJob => schema_for!(BatchJob),
        SchemaType::Config => schema_for!(BatchConfig),
    };

    let mut wtr = create_writer(schema_opts.output_path.as_deref()).await?;
    let schema_str =
        serde_json::to_string_pretty(&schema).context("failed to serialize schema")?;
    wtr.write_all(schema_str.as_bytes())
        .await
        .context("failed to write schema")?;
    wtr.flush().await.context("failed to flush schema")?;
    Ok(())
}
