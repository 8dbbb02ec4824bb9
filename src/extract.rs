//! Text extraction from source documents.
//!
//! Extraction is a capability registry: a mapping from file extension to an
//! extraction function, populated at startup and looked up per item. An
//! extension with no registered handler is a normal "unsupported type"
//! outcome, recorded per item, never a fatal error. Formats whose parsing we
//! do not carry (DOCX, PPTX, ODP, XLSX) simply have no entry here.

use std::collections::BTreeMap;

use crate::prelude::*;

/// Extracted text plus an estimated page/unit count for one document.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub text: String,
    /// Page estimate, used for progress reporting and scanned-PDF detection.
    /// Always at least 1.
    pub pages: usize,
}

/// An extraction function. Synchronous: every handler is a local read plus
/// CPU work, and the build pipeline is sequential.
pub type ExtractFn = fn(&Path) -> Result<Extraction>;

/// Registry from lowercase file extension to extraction function.
pub struct ExtractorRegistry {
    handlers: BTreeMap<&'static str, ExtractFn>,
}

impl ExtractorRegistry {
    /// Create a registry with the built-in handlers.
    pub fn with_defaults() -> ExtractorRegistry {
        let mut registry = ExtractorRegistry {
            handlers: BTreeMap::new(),
        };
        registry.register("txt", extract_plain_text);
        registry.register("md", extract_plain_text);
        registry.register("csv", extract_delimited);
        registry.register("tsv", extract_delimited);
        registry.register("pdf", extract_pdf);
        registry
    }

    /// Register a handler for an extension (lowercase, no leading dot).
    pub fn register(&mut self, extension: &'static str, handler: ExtractFn) {
        self.handlers.insert(extension, handler);
    }

    /// Look up the handler for an extension, case-insensitively.
    pub fn lookup(&self, extension: &str) -> Option<ExtractFn> {
        self.handlers
            .get(extension.to_ascii_lowercase().as_str())
            .copied()
    }

    /// All registered extensions, sorted.
    pub fn supported_extensions(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }
}

/// Read a `.txt` or `.md` file. Must be valid UTF-8; anything else is a
/// per-item failure.
fn extract_plain_text(path: &Path) -> Result<Extraction> {
    let text = read_utf8(path)?;
    Ok(Extraction { text, pages: 1 })
}

/// Read a `.csv` or `.tsv` file as plain text. The model sees the rows as-is;
/// we only estimate a "page" count at 50 data rows per page.
fn extract_delimited(path: &Path) -> Result<Extraction> {
    let text = read_utf8(path)?;
    let data_rows = text.lines().count().saturating_sub(1);
    let pages = (data_rows / 50).max(1);
    Ok(Extraction { text, pages })
}

/// Read a whole file as UTF-8.
fn read_utf8(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read {:?}", path.display()))?;
    String::from_utf8(bytes)
        .with_context(|| format!("{:?} is not valid UTF-8", path.display()))
}

/// Extract the text layer of a PDF.
fn extract_pdf(path: &Path) -> Result<Extraction> {
    let text = pdf_extract::extract_text(path)
        .with_context(|| format!("failed to extract text from {:?}", path.display()))?;
    let pages = estimate_pdf_pages(&text);
    Ok(Extraction { text, pages })
}

/// Estimate a PDF's page count from its extracted text.
///
/// The extractor emits a form feed between pages; when none survive (e.g. an
/// image-only PDF) fall back to a 500-words-per-page estimate.
fn estimate_pdf_pages(text: &str) -> usize {
    let form_feeds = text.matches('\u{c}').count();
    if form_feeds > 0 {
        form_feeds + 1
    } else {
        (text.split_whitespace().count() / 500).max(1)
    }
}

/// Average characters per sampled page below which a PDF is treated as
/// scanned.
const SCANNED_AVG_CHARS: usize = 100;

/// How many leading pages to sample when deciding.
const SCANNED_SAMPLE_PAGES: usize = 5;

/// Decide whether a PDF is a scan by sampling its text layer.
///
/// Averages the character count of the first five pages; scans come in at or
/// near zero. A PDF whose text layer cannot be parsed at all is also treated
/// as scanned, since rasterizing is the only way to get anything out of it.
pub fn pdf_looks_scanned(path: &Path) -> Result<bool> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read {:?}", path.display()))?;
    let pages = match pdf_extract::extract_text_from_mem_by_pages(&bytes) {
        Ok(pages) => pages,
        Err(err) => {
            warn!(
                path = %path.display(),
                "could not read text layer, assuming scanned: {}",
                err
            );
            return Ok(true);
        }
    };
    if pages.is_empty() {
        return Ok(true);
    }
    let sampled = pages.len().min(SCANNED_SAMPLE_PAGES);
    let total_chars: usize = pages[..sampled]
        .iter()
        .map(|page| page.trim().chars().count())
        .sum();
    Ok(total_chars / sampled < SCANNED_AVG_CHARS)
}

/// Build a structurally valid PDF with `page_count` pages each drawing
/// `text` once. Text must avoid parentheses and backslashes. Shared by the
/// tests that need a real parseable PDF without shipping a binary fixture;
/// pass an empty string for pages with no text layer.
#[cfg(test)]
pub(crate) fn make_text_pdf(text: &str, page_count: usize) -> Vec<u8> {
    let kids = (0..page_count)
        .map(|i| format!("{} 0 R", 3 + 2 * i))
        .collect::<Vec<_>>()
        .join(" ");
    let mut bodies: Vec<Vec<u8>> = vec![
        b"<< /Type /Catalog /Pages 2 0 R >>".to_vec(),
        format!("<< /Type /Pages /Kids [{kids}] /Count {page_count} >>").into_bytes(),
    ];
    for i in 0..page_count {
        let content_id = 4 + 2 * i;
        bodies.push(
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
                 /Contents {content_id} 0 R /Resources << /Font << /F1 \
                 << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> >> >> >>"
            )
            .into_bytes(),
        );
        let stream = format!("BT /F1 12 Tf 72 720 Td ({text}) Tj ET");
        let mut body = format!("<< /Length {} >>\nstream\n", stream.len()).into_bytes();
        body.extend_from_slice(stream.as_bytes());
        body.extend_from_slice(b"\nendstream");
        bodies.push(body);
    }

    let mut buf = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(bodies.len());
    for (index, body) in bodies.iter().enumerate() {
        offsets.push(buf.len());
        buf.extend_from_slice(format!("{} 0 obj\n", index + 1).as_bytes());
        buf.extend_from_slice(body);
        buf.extend_from_slice(b"\nendobj\n");
    }
    let xref_start = buf.len();
    buf.extend_from_slice(format!("xref\n0 {}\n", bodies.len() + 1).as_bytes());
    buf.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        buf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    buf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            bodies.len() + 1,
            xref_start
        )
        .as_bytes(),
    );
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_expected_extensions() {
        let registry = ExtractorRegistry::with_defaults();
        assert_eq!(
            registry.supported_extensions(),
            vec!["csv", "md", "pdf", "tsv", "txt"]
        );
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = ExtractorRegistry::with_defaults();
        assert!(registry.lookup("TXT").is_some());
        assert!(registry.lookup("Pdf").is_some());
        assert!(registry.lookup("docx").is_none());
    }

    #[test]
    fn plain_text_extraction_reads_whole_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "# Title\n\nSome body text.\n")?;

        let extraction = extract_plain_text(&path)?;
        assert_eq!(extraction.text, "# Title\n\nSome body text.\n");
        assert_eq!(extraction.pages, 1);
        Ok(())
    }

    #[test]
    fn plain_text_extraction_rejects_invalid_utf8() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mixed.txt");
        std::fs::write(&path, b"good text \xFF bad byte")?;

        let err = extract_plain_text(&path).expect_err("invalid UTF-8 should fail");
        assert!(format!("{err:#}").contains("UTF-8"));
        Ok(())
    }

    #[test]
    fn delimited_extraction_estimates_pages_from_rows() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data.csv");
        let mut contents = String::from("id,name\n");
        for i in 0..120 {
            contents.push_str(&format!("{i},row{i}\n"));
        }
        std::fs::write(&path, contents)?;

        let extraction = extract_delimited(&path)?;
        assert_eq!(extraction.pages, 2);
        Ok(())
    }

    #[test]
    fn pdf_page_estimate_prefers_form_feeds() {
        assert_eq!(estimate_pdf_pages("page one\u{c}page two\u{c}page three"), 3);
        // No form feeds: fall back to word count.
        let many_words = "word ".repeat(1100);
        assert_eq!(estimate_pdf_pages(&many_words), 2);
        assert_eq!(estimate_pdf_pages("short"), 1);
    }

    #[test]
    fn pdf_with_text_layer_is_not_scanned() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("digital.pdf");
        let line = "This page carries a full text layer with plenty of characters \
                    to sample for the scanned-document check. "
            .repeat(3);
        std::fs::write(&path, make_text_pdf(&line, 2))?;

        assert!(!pdf_looks_scanned(&path)?);
        Ok(())
    }

    #[test]
    fn pdf_without_text_layer_is_scanned() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("scan.pdf");
        std::fs::write(&path, make_text_pdf("", 3))?;

        assert!(pdf_looks_scanned(&path)?);
        Ok(())
    }

    #[test]
    fn pdf_text_layer_is_extracted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, make_text_pdf("Quarterly maintenance report", 1))?;

        let extraction = extract_pdf(&path)?;
        assert!(extraction.text.contains("Quarterly"));
        Ok(())
    }
}
