//! Rasterizing scanned PDFs into per-page images.
//!
//! Scanned documents have no useful text layer, so we hand the model page
//! images instead. Rasterization shells out to Poppler's `pdftocairo`, and
//! page counting to `pdfinfo`; both must be installed for scan-mode builds.

use std::{collections::BTreeMap, process::Output, sync::LazyLock, vec};

use anyhow::anyhow;
use regex::Regex;
use tokio::process::Command;

use crate::{data_url::data_url, prelude::*};

/// A default error regex for checking command output.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// Poppler prints this while reconstructing a damaged xref table; the
/// document still renders, so treat it as a warning.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line contain an error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// One rasterized page image.
#[derive(Debug)]
pub struct Page {
    /// The MIME type of our data. Always `image/png` for rasterized pages.
    pub mime_type: String,
    /// The data for our page.
    pub data: Vec<u8>,
}

impl Page {
    /// Convert to a data URL for embedding in a vision request.
    pub fn to_data_url(&self) -> String {
        data_url(&self.mime_type, &self.data)
    }
}

/// An iterator over a PDF's pages as PNG images, backed by a temporary
/// directory of files produced by `pdftocairo`.
pub struct PageIter {
    /// Holds the rasterized pages; released by [`Drop`].
    #[allow(dead_code)]
    tmpdir: Option<tempfile::TempDir>,
    /// Iterator over the page files in the temporary directory.
    dir_iter: vec::IntoIter<PathBuf>,
    /// Number of pages in the source document.
    total_pages: usize,
}

impl PageIter {
    /// Rasterize a PDF at the given DPI.
    #[instrument(level = "debug", skip_all, fields(path = %path.display(), dpi))]
    pub async fn rasterize_pdf(path: &Path, dpi: u32) -> Result<Self> {
        let total_pages = get_pdf_page_count(path).await?;

        // Construct an output filename. pdftocairo strips the extension and
        // appends zero-padded page numbers, so the files sort in page order.
        let filename = path
            .file_name()
            .context("failed to get filename from PDF path")?;
        let tmpdir = tempfile::TempDir::with_prefix("pages")?;
        let out_path = tmpdir.path().join(filename).with_extension("png");

        let mut cmd = Command::new("pdftocairo");
        cmd.arg("-png").arg("-r").arg(dpi.to_string());
        let output = cmd
            .arg(path)
            .arg(out_path)
            .output()
            .await
            .with_context(|| format!("failed to run pdftocairo on {:?}", path.display()))?;
        check_for_command_failure("pdftocairo", &output, Some(&is_error_line))?;

        let tmpdir_path = tmpdir.path();
        let mut dir_paths = tmpdir_path
            .read_dir()
            .with_context(|| {
                format!(
                    "failed to read temporary directory {:?}",
                    tmpdir_path.display()
                )
            })?
            .map(|entry| {
                let entry = entry.with_context(|| {
                    format!(
                        "failed to read entry in temporary directory {:?}",
                        tmpdir_path.display()
                    )
                })?;
                Ok(entry.path())
            })
            .collect::<Result<Vec<_>>>()?;
        dir_paths.sort();

        Ok(Self {
            tmpdir: Some(tmpdir),
            dir_iter: dir_paths.into_iter(),
            total_pages,
        })
    }

    /// Number of pages in the source document.
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }
}

impl Drop for PageIter {
    fn drop(&mut self) {
        // Delete our temporary directory, if we have one.
        if let Some(tmpdir) = self.tmpdir.take() {
            let tmpdir_path = tmpdir.path().to_owned();
            if let Err(err) = tmpdir.close() {
                error!(
                    directory = ?tmpdir_path.display(),
                    "failed to delete temporary directory: {}",
                    err
                );
            }
        }
    }
}

impl Iterator for PageIter {
    type Item = Result<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        use std::fs;
        if let Some(path) = self.dir_iter.next() {
            let result = fs::read(&path)
                .with_context(|| format!("failed to read file {:?}", path.display()));
            let bytes = match result {
                Ok(bytes) => bytes,
                Err(err) => return Some(Err(err)),
            };

            // Delete the file to recover space a bit early.
            if self.tmpdir.is_some() {
                let result = fs::remove_file(&path).with_context(|| {
                    format!("failed to delete file {:?}", path.display())
                });
                if let Err(err) = result {
                    return Some(Err(err));
                }
            }

            Some(Ok(Page {
                mime_type: "image/png".to_string(),
                data: bytes,
            }))
        } else {
            None
        }
    }
}

/// Get the number of pages in a PDF file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn get_pdf_page_count(path: &Path) -> Result<usize> {
    let mut cmd = Command::new("pdfinfo");
    let output = cmd
        .arg(path)
        .output()
        .await
        .with_context(|| format!("failed to run pdfinfo on {:?}", path.display()))?;
    check_for_command_failure("pdfinfo", &output, None)?;

    // Parse the output of pdfinfo into properties.
    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    let mut properties = BTreeMap::new();
    for line in output.lines() {
        let mut parts = line.splitn(2, ':');
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        properties.insert(key.to_string(), value.to_string());
    }

    let page_count_str = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("failed to find page count in pdfinfo output"))?;
    page_count_str.parse::<usize>().with_context(|| {
        format!(
            "failed to parse page count for {:?} from pdfinfo output",
            path.display()
        )
    })
}

/// Report any command failures, and include any error output.
///
/// Standard error may optionally be checked line-by-line against a predicate
/// to catch tools that report errors but still exit 0.
fn check_for_command_failure(
    command_name: &str,
    output: &Output,
    error_check: Option<&dyn Fn(&str) -> bool>,
) -> Result<()> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!(
        command_name = command_name,
        stdout = %stdout,
        stderr = %stderr,
        "Command output"
    );

    if output.status.success() {
        if let Some(is_error) = error_check
            && stderr.lines().any(|line| is_error(line))
        {
            return Err(anyhow!(
                "{} printed error output:\n{}",
                command_name,
                stderr,
            ));
        }
        Ok(())
    } else if let Some(exit_code) = output.status.code() {
        Err(anyhow!(
            "{} failed with exit code {} and error output:\n{}",
            command_name,
            exit_code,
            stderr,
        ))
    } else {
        Err(anyhow!(
            "{} failed with error output:\n{}",
            command_name,
            stderr,
        ))
    }
}
