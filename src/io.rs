//! I/O utilities.
//!
//! This module reads and writes the JSONL files that batch endpoints consume
//! and produce. Artifacts are small enough to hold in memory, so we read
//! whole files and parse line by line, keeping the line number in any parse
//! error.

use serde::{Serialize, de::DeserializeOwned};
use tokio::{
    fs::File,
    io::{AsyncWrite, AsyncWriteExt as _, BufWriter},
};

use crate::prelude::*;

/// Read a JSONL file into a vector of records.
pub async fn read_jsonl<T>(path: &Path) -> Result<Vec<T>>
where
    T: DeserializeOwned,
{
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read file {:?}", path.display()))?;
    parse_jsonl(&data)
        .with_context(|| format!("failed to parse JSONL from {:?}", path.display()))
}

/// Parse JSONL from a string, skipping blank lines.
pub fn parse_jsonl<T>(data: &str) -> Result<Vec<T>>
where
    T: DeserializeOwned,
{
    let mut records = Vec::new();
    for (idx, line) in data.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(line)
            .with_context(|| format!("failed to parse JSON on line {}", idx + 1))?;
        records.push(record);
    }
    Ok(records)
}

/// Write records to a JSONL file, one JSON object per line.
pub async fn write_jsonl<T>(path: &Path, records: &[T]) -> Result<()>
where
    T: Serialize,
{
    let file = File::create(path)
        .await
        .with_context(|| format!("failed to create file {:?}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        let json =
            serde_json::to_string(record).context("failed to serialize JSON record")?;
        writer
            .write_all(json.as_bytes())
            .await
            .context("failed to write JSON to output")?;
        writer
            .write_all(b"\n")
            .await
            .context("failed to write newline to output")?;
    }
    writer.flush().await.context("failed to flush output")?;
    Ok(())
}

/// Create an [`AsyncWrite`] for a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("failed to create file {:?}", path.display()))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}
