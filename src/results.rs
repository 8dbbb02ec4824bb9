//! Processing downloaded batch results.
//!
//! The results file is JSONL with one record per submitted request, in
//! server order, correlated back to our inputs only by `custom_id`. Records
//! are processed independently: a record that failed on the server, carries
//! no content, or fails a quality check is recorded and skipped, and the
//! rest of the file is still processed.

use anyhow::anyhow;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt as _;

use crate::{
    artifact::{embedding_filename, summary_filename},
    ident::strip_known_prefix,
    io::parse_jsonl,
    prelude::*,
    ui::{ProgressConfig, Ui},
};

/// Content shorter than this is treated as a failed generation.
pub const MIN_LENGTH_THRESHOLD: usize = 50;

/// Content shorter than this gets a warning but is still written.
pub const SHORT_LENGTH_THRESHOLD: usize = 200;

/// Words that suggest the prompt asked for JSON output.
const JSON_EXPECTATION_KEYWORDS: &[&str] = &[
    "json",
    "extract",
    "structured",
    "parse",
    "{",
    "return as",
    "output format",
];

/// Does this prompt look like it asks the model for JSON output?
///
/// This is a coarse keyword heuristic, used only to decide whether to warn
/// when content fails to parse as JSON. It never fails a record.
pub fn prompt_expects_json(prompt: &str) -> bool {
    let lowered = prompt.to_lowercase();
    JSON_EXPECTATION_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

/// One line of a downloaded results file.
#[derive(Clone, Debug, Deserialize, JsonSchema)]
pub struct ResultRecord {
    /// The `custom_id` from the matching request record.
    pub custom_id: String,

    /// The wrapped response, if the server produced one.
    #[serde(default)]
    pub response: Option<ResultResponse>,

    /// Per-request error reported by the server.
    #[serde(default)]
    pub error: Option<Value>,
}

/// The wrapped response inside a result record.
#[derive(Clone, Debug, Deserialize, JsonSchema)]
pub struct ResultResponse {
    /// HTTP status of the wrapped request.
    #[serde(default)]
    pub status_code: Option<u16>,

    /// The response body. Shape depends on the endpoint, so we keep it
    /// untyped and dig out what we need.
    #[serde(default)]
    pub body: Option<Value>,
}

/// A record that produced no output file, and why.
#[derive(Clone, Debug)]
pub struct RecordFailure {
    /// The record's `custom_id`.
    pub custom_id: String,

    /// Human-readable reason.
    pub reason: String,
}

/// A non-fatal oddity noticed while writing a record's output.
#[derive(Clone, Debug)]
pub struct RecordWarning {
    /// The record's `custom_id`.
    pub custom_id: String,

    /// Human-readable warning.
    pub warning: String,
}

/// What processing a results file produced.
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    /// Output files written, in record order.
    pub files_written: Vec<PathBuf>,

    /// Records that produced no output file.
    pub failures: Vec<RecordFailure>,

    /// Warnings for records whose output was still written.
    pub warnings: Vec<RecordWarning>,
}

/// Process a downloaded results file, writing one output file per usable
/// record into `output_dir`.
///
/// Output names embed `timestamp`, and existing files are never overwritten:
/// a name collision fails that record and leaves the existing file alone.
#[instrument(level = "debug", skip_all, fields(output_dir = %output_dir.display()))]
pub async fn process_results(
    ui: &Ui,
    results_jsonl: &str,
    output_dir: &Path,
    timestamp: &str,
    expects_json: bool,
) -> Result<ProcessOutcome> {
    let records: Vec<ResultRecord> =
        parse_jsonl(results_jsonl).context("failed to parse results file")?;
    tokio::fs::create_dir_all(output_dir).await.with_context(|| {
        format!("failed to create output directory {:?}", output_dir.display())
    })?;

    let progress = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "📝",
            msg: "Writing outputs",
            done_msg: "Wrote outputs",
        },
        records.len() as u64,
    );

    let mut outcome = ProcessOutcome::default();
    for record in &records {
        match process_record(record, output_dir, timestamp, expects_json, &mut outcome)
            .await
        {
            Ok(()) => {}
            Err(err) => {
                warn!(custom_id = %record.custom_id, "record failed: {:#}", err);
                outcome.failures.push(RecordFailure {
                    custom_id: record.custom_id.clone(),
                    reason: format!("{err:#}"),
                });
            }
        }
        progress.inc(1);
    }
    Ok(outcome)
}

/// Process one record, appending to `outcome` on success.
async fn process_record(
    record: &ResultRecord,
    output_dir: &Path,
    timestamp: &str,
    expects_json: bool,
    outcome: &mut ProcessOutcome,
) -> Result<()> {
    if let Some(error) = &record.error
        && !error.is_null()
    {
        return Err(anyhow!("server reported error: {error}"));
    }
    let response = record
        .response
        .as_ref()
        .ok_or_else(|| anyhow!("record has no response"))?;
    if let Some(status_code) = response.status_code
        && status_code != 200
    {
        return Err(anyhow!("server returned status {status_code}"));
    }
    let body = response
        .body
        .as_ref()
        .ok_or_else(|| anyhow!("response has no body"))?;

    let identifier = strip_known_prefix(&record.custom_id);
    if body.get("choices").is_some() {
        let content = chat_content(body)?;
        let length = content.chars().count();
        if length < MIN_LENGTH_THRESHOLD {
            return Err(anyhow!("content too short ({length} chars)"));
        }
        let mut warnings = Vec::new();
        if length < SHORT_LENGTH_THRESHOLD {
            warnings.push(format!("content is short ({length} chars)"));
        }
        if expects_json && serde_json::from_str::<Value>(content).is_err() {
            warnings.push(
                "prompt suggests JSON output but the content is not valid JSON"
                    .to_owned(),
            );
        }
        let path = output_dir.join(summary_filename(identifier, timestamp));
        write_new_file(&path, format!("{content}\n").as_bytes()).await?;
        outcome.files_written.push(path);
        outcome
            .warnings
            .extend(warnings.into_iter().map(|warning| RecordWarning {
                custom_id: record.custom_id.clone(),
                warning,
            }));
    } else if let Some(data) = body.get("data") {
        let json = serde_json::to_string_pretty(data)
            .context("failed to serialize embedding data")?;
        let path = output_dir.join(embedding_filename(identifier, timestamp));
        write_new_file(&path, format!("{json}\n").as_bytes()).await?;
        outcome.files_written.push(path);
    } else {
        return Err(anyhow!("unrecognized response body"));
    }
    Ok(())
}

/// Pull the generated text out of a chat completion body.
fn chat_content(body: &Value) -> Result<&str> {
    body.get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .map(str::trim)
        .ok_or_else(|| anyhow!("response has no message content"))
}

/// Create a file that must not already exist.
async fn write_new_file(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .with_context(|| {
            format!("failed to create output file {:?}", path.display())
        })?;
    file.write_all(contents)
        .await
        .with_context(|| format!("failed to write output file {:?}", path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("failed to flush output file {:?}", path.display()))?;
    Ok(())
}
