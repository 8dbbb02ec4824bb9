//! Building batch request records from source files.
//!
//! One build pass walks the discovered files, extracts or rasterizes each
//! one according to the request mode, and produces the records that become
//! the uploaded JSONL artifact. Problems with individual files are recorded
//! and reported, never fatal; one unreadable document should not sink a run
//! of ten thousand.

use std::collections::HashSet;

use anyhow::anyhow;

use crate::artifact::BuildFailure;
use crate::chunk::{self, DEFAULT_PAGES_PER_CHUNK};
use crate::config::BatchConfig;
use crate::data_url::data_url;
use crate::extract::{self, ExtractorRegistry};
use crate::ident::{self, IdAllocator};
use crate::pages::PageIter;
use crate::prelude::*;
use crate::request::{BatchRequestRecord, Message, RequestMode};
use crate::ui::{ProgressConfig, Ui};

/// Minimum extracted characters for a chat-mode document. Anything shorter
/// is recorded as a failure instead of being sent to the model.
const MIN_TEXT_CHARS: usize = 100;

/// Embedding inputs are useful at much shorter lengths.
const MIN_EMBED_TEXT_CHARS: usize = 10;

/// Everything [`build_requests`] needs beyond the file list.
pub struct BuildOptions<'a> {
    pub mode: RequestMode,

    /// The rendered prompt. Unused in embed mode.
    pub prompt: &'a str,

    pub config: &'a BatchConfig,

    /// Command-line override for the model named in each request.
    pub model: Option<&'a str>,

    /// Command-line override for the completion token cap.
    pub max_tokens: Option<u32>,

    /// Pages per chunk in scan mode, tokens per chunk in embed mode. Embed
    /// documents are sent whole when unset.
    pub chunk_size: Option<usize>,

    /// Rasterization resolution for scan mode.
    pub dpi: u32,

    /// Skip the text-layer check and rasterize unconditionally.
    pub force_scan: bool,

    pub skip_existing: Option<SkipExisting<'a>>,
}

impl BuildOptions<'_> {
    /// The model each request will name, after the command-line override.
    pub fn resolved_model(&self) -> String {
        let default = if self.mode.is_chat() {
            &self.config.models.default_model
        } else {
            &self.config.models.embedding_model
        };
        self.model.map(str::to_owned).unwrap_or_else(|| default.clone())
    }

    /// The completion token cap, after the command-line override. Embedding
    /// requests have no completion side, so this is zero for them.
    pub fn resolved_max_tokens(&self) -> u32 {
        if !self.mode.is_chat() {
            return 0;
        }
        self.max_tokens.unwrap_or(self.config.output.max_tokens)
    }
}

/// Inputs for the skip-existing check: where prior outputs live and the
/// prompt fingerprints being compared.
pub struct SkipExisting<'a> {
    pub output_dir: &'a Path,

    /// Fingerprint of this run's rendered prompt.
    pub fingerprint: &'a str,

    /// Fingerprint recorded by the most recent prior build, if any.
    pub previous_fingerprint: Option<&'a str>,
}

/// What a build pass produced from the discovered files.
#[derive(Debug, Default)]
pub struct BuildOutcome {
    pub records: Vec<BatchRequestRecord>,

    /// Files that produced no requests, with the reason each one failed.
    pub failures: Vec<BuildFailure>,

    /// Files skipped because a prior run already produced their output.
    pub skipped: Vec<PathBuf>,

    /// Characters of document text and prompts across all built requests,
    /// the input side of the cost estimate.
    pub input_chars: u64,

    /// Files that produced at least one request.
    pub built: usize,
}

impl BuildOutcome {
    /// Every input file lands in exactly one of built, failed or skipped.
    pub fn files_considered(&self) -> usize {
        self.built + self.failures.len() + self.skipped.len()
    }
}

/// Resolve the set of input files for a build.
///
/// Explicit file arguments are taken as-is; anything wrong with them shows
/// up later as a per-file failure. Otherwise the input directory is scanned
/// (non-recursively) for matching extensions, and the result is sorted so
/// repeated runs see the same order.
pub fn discover_files(
    files: &[PathBuf],
    input_dir: &Path,
    extensions: &[String],
) -> Result<Vec<PathBuf>> {
    if !files.is_empty() {
        return Ok(files.to_vec());
    }
    let entries = std::fs::read_dir(input_dir)
        .with_context(|| format!("failed to read input directory {:?}", input_dir.display()))?;
    let mut found = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| {
                format!("failed to read input directory {:?}", input_dir.display())
            })?
            .path();
        if !path.is_file() {
            continue;
        }
        let Some(extension) = path.extension().and_then(|ext| ext.to_str()) else {
            continue;
        };
        if extensions
            .iter()
            .any(|wanted| wanted.eq_ignore_ascii_case(extension))
        {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// Build batch request records for `files`.
#[instrument(level = "debug", skip_all, fields(mode = %options.mode, files = files.len()))]
pub async fn build_requests(
    ui: &Ui,
    files: &[PathBuf],
    options: &BuildOptions<'_>,
) -> Result<BuildOutcome> {
    let registry = ExtractorRegistry::with_defaults();
    let existing = existing_outputs(options);
    let pages_per_chunk = match options.mode {
        RequestMode::Scan => effective_pages_per_chunk(options.chunk_size),
        _ => DEFAULT_PAGES_PER_CHUNK,
    };

    let progress = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "🧾",
            msg: "Building requests",
            done_msg: "Built requests",
        },
        files.len() as u64,
    );

    let mut outcome = BuildOutcome::default();
    let mut ids = IdAllocator::new();
    for path in files {
        let built = match options.mode {
            RequestMode::Summary => {
                build_summary(path, &registry, options, &existing, &mut ids)
            }
            RequestMode::Image => build_image(path, options, &existing, &mut ids),
            RequestMode::Scan => build_scan(path, options, pages_per_chunk, &mut ids).await,
            RequestMode::Embed => build_embed(path, &registry, options, &mut ids),
        };
        match built {
            Ok(FileBuild::Records { records, chars }) => {
                outcome.built += 1;
                outcome.input_chars += chars;
                outcome.records.extend(records);
            }
            Ok(FileBuild::Skipped) => {
                debug!(path = %path.display(), "output already exists, skipping");
                outcome.skipped.push(path.clone());
            }
            Err(err) => {
                warn!(path = %path.display(), "skipping file: {:#}", err);
                outcome.failures.push(BuildFailure {
                    path: path.clone(),
                    reason: format!("{err:#}"),
                });
            }
        }
        progress.inc(1);
    }
    Ok(outcome)
}

/// What one source file contributed to the batch.
enum FileBuild {
    Records {
        records: Vec<BatchRequestRecord>,
        /// Characters of input these requests will send.
        chars: u64,
    },
    Skipped,
}

fn build_summary(
    path: &Path,
    registry: &ExtractorRegistry,
    options: &BuildOptions<'_>,
    existing: &HashSet<String>,
    ids: &mut IdAllocator,
) -> Result<FileBuild> {
    let prefix = options.mode.prefix();
    let stem = ident::stem_for_path(path, prefix, 0);
    if existing.contains(&stem) {
        return Ok(FileBuild::Skipped);
    }

    let text = extract_text(path, registry)?;
    let text_chars = text.chars().count();
    if text_chars < MIN_TEXT_CHARS {
        return Err(anyhow!("insufficient text ({text_chars} chars)"));
    }

    let content = format!("{}\n\nDocument text:\n{}", options.prompt, text);
    let custom_id = ids.claim(&format!("{prefix}{stem}"));
    let record = BatchRequestRecord::chat(
        custom_id,
        &options.config.api.chat_completions_endpoint,
        options.resolved_model(),
        vec![Message::user_text(content)],
        options.resolved_max_tokens(),
    );
    Ok(FileBuild::Records {
        records: vec![record],
        chars: (text_chars + options.prompt.chars().count()) as u64,
    })
}

fn build_image(
    path: &Path,
    options: &BuildOptions<'_>,
    existing: &HashSet<String>,
    ids: &mut IdAllocator,
) -> Result<FileBuild> {
    let prefix = options.mode.prefix();
    let stem = ident::stem_for_path(path, prefix, 0);
    if existing.contains(&stem) {
        return Ok(FileBuild::Skipped);
    }

    let guessed = mime_guess::from_path(path).first();
    let mime = guessed
        .as_ref()
        .map(|mime| mime.essence_str())
        .unwrap_or("application/octet-stream");
    if !mime.starts_with("image/") {
        return Err(anyhow!("not an image ({mime})"));
    }
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read {:?}", path.display()))?;
    let url = data_url(mime, &bytes);

    let custom_id = ids.claim(&format!("{prefix}{stem}"));
    let record = BatchRequestRecord::chat(
        custom_id,
        &options.config.api.chat_completions_endpoint,
        options.resolved_model(),
        vec![Message::user_with_images(options.prompt.to_owned(), vec![url])],
        options.resolved_max_tokens(),
    );
    Ok(FileBuild::Records {
        records: vec![record],
        chars: options.prompt.chars().count() as u64,
    })
}

async fn build_scan(
    path: &Path,
    options: &BuildOptions<'_>,
    pages_per_chunk: usize,
    ids: &mut IdAllocator,
) -> Result<FileBuild> {
    if !options.force_scan && !extract::pdf_looks_scanned(path)? {
        return Err(anyhow!(
            "has a text layer; use summary mode, or --force-scan to rasterize anyway"
        ));
    }

    let page_iter = PageIter::rasterize_pdf(path, options.dpi).await?;
    let mut urls = Vec::with_capacity(page_iter.total_pages());
    for page in page_iter {
        urls.push(page?.to_data_url());
    }
    if urls.is_empty() {
        return Err(anyhow!("produced no pages"));
    }

    let prefix = options.mode.prefix();
    let chunk_count = chunk::page_chunk_count(urls.len(), pages_per_chunk);
    let suffix_reserve = if chunk_count == 1 {
        0
    } else {
        ident::page_chunk_suffix(chunk_count, chunk_count)
            .chars()
            .count()
    };
    let stem = ident::stem_for_path(path, prefix, suffix_reserve);

    let prompt_chars = options.prompt.chars().count() as u64;
    let mut records = Vec::with_capacity(chunk_count);
    let mut chars = 0u64;
    for (index, chunk_urls) in urls.chunks(pages_per_chunk).enumerate() {
        let suffix = if chunk_count == 1 {
            String::new()
        } else {
            ident::page_chunk_suffix(index + 1, chunk_count)
        };
        let custom_id = ids.claim(&format!("{prefix}{stem}{suffix}"));
        records.push(BatchRequestRecord::chat(
            custom_id,
            &options.config.api.chat_completions_endpoint,
            options.resolved_model(),
            vec![Message::user_with_images(
                options.prompt.to_owned(),
                chunk_urls.to_vec(),
            )],
            options.resolved_max_tokens(),
        ));
        chars += prompt_chars;
    }
    Ok(FileBuild::Records { records, chars })
}

fn build_embed(
    path: &Path,
    registry: &ExtractorRegistry,
    options: &BuildOptions<'_>,
    ids: &mut IdAllocator,
) -> Result<FileBuild> {
    let text = extract_text(path, registry)?;
    let text_chars = text.chars().count();
    if text_chars < MIN_EMBED_TEXT_CHARS {
        return Err(anyhow!("insufficient text ({text_chars} chars)"));
    }

    let chunks = match options.chunk_size {
        Some(chunk_tokens) => chunk::chunk_words(&text, chunk_tokens),
        None => vec![text],
    };

    let prefix = options.mode.prefix();
    let multi = chunks.len() > 1;
    let suffix_reserve = if multi {
        ident::text_chunk_suffix(chunks.len()).chars().count()
    } else {
        0
    };
    let stem = ident::stem_for_path(path, prefix, suffix_reserve);

    let mut records = Vec::with_capacity(chunks.len());
    let mut chars = 0u64;
    for (index, chunk_text) in chunks.into_iter().enumerate() {
        let suffix = if multi {
            ident::text_chunk_suffix(index + 1)
        } else {
            String::new()
        };
        let custom_id = ids.claim(&format!("{prefix}{stem}{suffix}"));
        chars += chunk_text.chars().count() as u64;
        records.push(BatchRequestRecord::embedding(
            custom_id,
            &options.config.api.embeddings_endpoint,
            options.resolved_model(),
            chunk_text,
        ));
    }
    Ok(FileBuild::Records { records, chars })
}

/// Extract and trim a document's text via the registry.
fn extract_text(path: &Path, registry: &ExtractorRegistry) -> Result<String> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .ok_or_else(|| anyhow!("no file extension"))?;
    let handler = registry
        .lookup(extension)
        .ok_or_else(|| anyhow!("unsupported file type {extension:?}"))?;
    let extraction = handler(path)?;
    Ok(extraction.text.trim().to_owned())
}

/// Identifiers with existing outputs, when the skip-existing check applies.
///
/// Only summary and image outputs are one file per input, so only those
/// modes can skip. A changed prompt fingerprint disables skipping entirely;
/// prior outputs were written for a different prompt.
fn existing_outputs(options: &BuildOptions<'_>) -> HashSet<String> {
    let Some(skip) = &options.skip_existing else {
        return HashSet::new();
    };
    if !matches!(options.mode, RequestMode::Summary | RequestMode::Image) {
        warn!("skip-existing only applies to summary and image outputs; building everything");
        return HashSet::new();
    }
    match skip.previous_fingerprint {
        Some(previous) if previous == skip.fingerprint => {
            existing_summary_identifiers(skip.output_dir)
        }
        Some(_) => {
            info!("prompt changed since the last build; rebuilding everything");
            HashSet::new()
        }
        None => {
            debug!("no recorded prompt fingerprint; nothing to skip");
            HashSet::new()
        }
    }
}

/// Collect the identifier part of every summary filename in `output_dir`.
/// A missing directory just means no prior outputs.
fn existing_summary_identifiers(output_dir: &Path) -> HashSet<String> {
    let Ok(entries) = std::fs::read_dir(output_dir) else {
        return HashSet::new();
    };
    let mut identifiers = HashSet::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(stem) = name.strip_suffix(".md") else {
            continue;
        };
        if let Some(split) = stem.rfind("_summary_") {
            identifiers.insert(stem[..split].to_owned());
        }
    }
    identifiers
}

/// Resolve the scan-mode chunk size, clamping requests that would overflow
/// the model context.
fn effective_pages_per_chunk(requested: Option<usize>) -> usize {
    let Some(requested) = requested else {
        return DEFAULT_PAGES_PER_CHUNK;
    };
    let max_safe = chunk::max_safe_pages_per_chunk();
    if requested > max_safe {
        warn!(
            "{} pages per chunk will not fit a {}-token context at ~{} tokens per page; using {}",
            requested,
            chunk::MAX_CONTEXT_TOKENS,
            chunk::TOKENS_PER_PAGE,
            max_safe
        );
        return max_safe;
    }
    requested.max(1)
}
