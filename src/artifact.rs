//! On-disk artifacts for a batch run.
//!
//! Every build or submit writes its operator-facing files into a logs
//! directory: the JSONL request artifact, an error log for files that could
//! not be turned into requests, a plain-text marker holding the submitted
//! job ID, and a fingerprint of the prompt used. File names embed a
//! `YYYYMMDD_HHMMSS` timestamp, so the lexicographically greatest name is
//! always the most recent run, and `submit`/`poll` can find their inputs
//! without any flags.

use anyhow::anyhow;
use chrono::{DateTime, Local};
use serde::Serialize;

use crate::{io::write_jsonl, prelude::*};

/// Timestamp embedded in artifact file names, e.g. `20260825_143000`.
pub fn file_timestamp(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Human-readable timestamp for log headers and progress lines.
pub fn human_timestamp(now: DateTime<Local>) -> String {
    now.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Name of the JSONL request artifact for a run.
pub fn requests_filename(timestamp: &str) -> String {
    format!("batch_requests_{timestamp}.jsonl")
}

/// Name of the per-file error log for a run.
pub fn errors_filename(timestamp: &str) -> String {
    format!("batch_errors_{timestamp}.log")
}

/// Name of the job ID marker for a run.
pub fn batch_id_filename(timestamp: &str) -> String {
    format!("batch_id_{timestamp}.txt")
}

/// Name of the prompt fingerprint marker for a run.
pub fn fingerprint_filename(timestamp: &str) -> String {
    format!("prompt_fingerprint_{timestamp}.txt")
}

/// Name of a per-document summary output file.
pub fn summary_filename(identifier: &str, timestamp: &str) -> String {
    format!("{identifier}_summary_{timestamp}.md")
}

/// Name of a per-document embedding output file.
pub fn embedding_filename(identifier: &str, timestamp: &str) -> String {
    format!("{identifier}_embedding_{timestamp}.json")
}

/// A file that could not be turned into a request, and why.
#[derive(Clone, Debug)]
pub struct BuildFailure {
    /// The source file.
    pub path: PathBuf,

    /// Human-readable reason, e.g. "insufficient text (42 chars)".
    pub reason: String,
}

/// The logs directory for batch artifacts.
///
/// Constructing one creates the directory, so dry runs must never construct
/// one.
#[derive(Clone, Debug)]
pub struct LogsDir {
    dir: PathBuf,
}

impl LogsDir {
    /// Open the logs directory, creating it if needed.
    pub async fn create(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await.with_context(|| {
            format!("failed to create logs directory {:?}", dir.display())
        })?;
        Ok(Self {
            dir: dir.to_owned(),
        })
    }

    /// The directory itself.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Write the JSONL request artifact for this run.
    pub async fn write_requests<T: Serialize>(
        &self,
        timestamp: &str,
        records: &[T],
    ) -> Result<PathBuf> {
        let path = self.dir.join(requests_filename(timestamp));
        write_jsonl(&path, records).await?;
        Ok(path)
    }

    /// Write the error log for this run, if anything failed.
    pub async fn write_error_log(
        &self,
        timestamp: &str,
        generated_at: &str,
        failures: &[BuildFailure],
    ) -> Result<Option<PathBuf>> {
        if failures.is_empty() {
            return Ok(None);
        }
        let mut log = String::new();
        log.push_str("Batch Creation Error Log\n");
        log.push_str(&format!("Generated: {generated_at}\n"));
        log.push_str(&format!("Total files failed: {}\n", failures.len()));
        log.push_str(&"=".repeat(60));
        log.push_str("\n\n");
        for failure in failures {
            log.push_str(&format!("File: {}\n", failure.path.display()));
            log.push_str(&format!("Reason: {}\n", failure.reason));
            log.push_str(&"-".repeat(60));
            log.push('\n');
        }
        let path = self.dir.join(errors_filename(timestamp));
        tokio::fs::write(&path, log).await.with_context(|| {
            format!("failed to write error log {:?}", path.display())
        })?;
        Ok(Some(path))
    }

    /// Record the submitted job ID so `poll` can find it later.
    pub async fn write_batch_id(&self, timestamp: &str, batch_id: &str) -> Result<PathBuf> {
        let path = self.dir.join(batch_id_filename(timestamp));
        tokio::fs::write(&path, format!("{batch_id}\n"))
            .await
            .with_context(|| {
                format!("failed to write job ID marker {:?}", path.display())
            })?;
        Ok(path)
    }

    /// Record the fingerprint of the prompt used for this run.
    pub async fn write_prompt_fingerprint(
        &self,
        timestamp: &str,
        fingerprint: &str,
    ) -> Result<PathBuf> {
        let path = self.dir.join(fingerprint_filename(timestamp));
        tokio::fs::write(&path, format!("{fingerprint}\n"))
            .await
            .with_context(|| {
                format!("failed to write prompt fingerprint {:?}", path.display())
            })?;
        Ok(path)
    }

}

/// Find the most recent request artifact in `dir`.
pub async fn latest_requests_artifact(dir: &Path) -> Result<PathBuf> {
    latest_file_with(dir, "batch_requests_", ".jsonl")
        .await?
        .ok_or_else(|| {
            anyhow!(
                "no batch_requests_*.jsonl found in {:?} (run `build` first)",
                dir.display()
            )
        })
}

/// Find the most recent job ID marker in `dir` and read it.
pub async fn latest_batch_id(dir: &Path) -> Result<(String, PathBuf)> {
    let path = latest_file_with(dir, "batch_id_", ".txt")
        .await?
        .ok_or_else(|| {
            anyhow!(
                "no batch_id_*.txt found in {:?} (run `submit` first)",
                dir.display()
            )
        })?;
    let contents = tokio::fs::read_to_string(&path).await.with_context(|| {
        format!("failed to read job ID marker {:?}", path.display())
    })?;
    let batch_id = contents.trim().to_owned();
    if batch_id.is_empty() {
        return Err(anyhow!("job ID marker {:?} is empty", path.display()));
    }
    Ok((batch_id, path))
}

/// Read the most recent recorded prompt fingerprint, if any.
///
/// Never creates the directory; a missing one just means no build has
/// recorded a fingerprint yet.
pub async fn latest_prompt_fingerprint(dir: &Path) -> Result<Option<String>> {
    let Some(path) = latest_file_with(dir, "prompt_fingerprint_", ".txt").await? else {
        return Ok(None);
    };
    let contents = tokio::fs::read_to_string(&path).await.with_context(|| {
        format!("failed to read prompt fingerprint {:?}", path.display())
    })?;
    Ok(Some(contents.trim().to_owned()))
}

/// Find the lexicographically greatest file name in `dir` with the given
/// prefix and suffix. Our timestamp format makes that the most recent one.
/// A missing directory yields `None`.
async fn latest_file_with(
    dir: &Path,
    prefix: &str,
    suffix: &str,
) -> Result<Option<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to read logs directory {:?}", dir.display())
            });
        }
    };
    let mut best: Option<(String, PathBuf)> = None;
    while let Some(entry) = entries.next_entry().await.with_context(|| {
        format!("failed to read entry in {:?}", dir.display())
    })? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(prefix)
            && name.ends_with(suffix)
            && best.as_ref().map_or(true, |(b, _)| name > *b)
        {
            best = Some((name, entry.path()));
        }
    }
    Ok(best.map(|(_, path)| path))
}
