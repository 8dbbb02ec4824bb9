//! Correlation identifiers and prompt fingerprints.
//!
//! Every batch request carries a `custom_id` which is the only link between a
//! submitted request and the matching line of the downloaded results file. We
//! derive these from source filenames, so they need sanitizing, a length
//! budget, and collision handling.

use std::collections::HashSet;

use sha2::{Digest as _, Sha256};

use crate::prelude::*;

/// The server caps `custom_id` at this many characters.
pub const MAX_CUSTOM_ID_LEN: usize = 64;

/// Known `custom_id` prefixes, one per request mode. The result processor
/// strips these to recover the original identifier.
pub const KNOWN_PREFIXES: &[&str] = &["summary-", "image-", "scan-", "embed-"];

/// Replace characters that are unsafe in identifiers and downstream filenames.
pub fn sanitize_stem(stem: &str) -> String {
    stem.replace('%', "_").replace(' ', "_").replace('&', "and")
}

/// Derive the sanitized identifier stem for a source file, truncated so that
/// `prefix + stem + suffix_reserve` stays within [`MAX_CUSTOM_ID_LEN`].
///
/// `suffix_reserve` is the length of the longest chunk suffix that will be
/// appended for this file, so all chunks of one file share a stem.
pub fn stem_for_path(path: &Path, prefix: &str, suffix_reserve: usize) -> String {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_owned());
    let budget = MAX_CUSTOM_ID_LEN
        .saturating_sub(prefix.chars().count())
        .saturating_sub(suffix_reserve);
    truncate_chars(&sanitize_stem(&stem), budget)
}

/// Suffix for chunk `number` (1-based) of `total` when a document is split
/// into page chunks.
pub fn page_chunk_suffix(number: usize, total: usize) -> String {
    format!("-chunk{number}of{total}")
}

/// Suffix for text chunk `number` (1-based) of an embeddings document.
pub fn text_chunk_suffix(number: usize) -> String {
    format!("-chunk{number}")
}

/// Strip the known request-kind prefix from a correlation identifier,
/// recovering the original safe stem (plus any chunk suffix).
pub fn strip_known_prefix(custom_id: &str) -> &str {
    for prefix in KNOWN_PREFIXES {
        if let Some(rest) = custom_id.strip_prefix(prefix) {
            return rest;
        }
    }
    custom_id
}

/// Short content fingerprint of the rendered prompt template.
///
/// Recorded at build time and compared by skip-existing runs: a changed
/// prompt means prior outputs are stale and nothing is skipped.
pub fn prompt_fingerprint(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    hex::encode(&digest[..6])
}

/// Hands out `custom_id` values, guaranteeing uniqueness within one batch.
///
/// Truncation can map two different filenames to the same stem; we append a
/// numeric disambiguator rather than let the result processor misattribute
/// output to the wrong input.
#[derive(Debug, Default)]
pub struct IdAllocator {
    used: HashSet<String>,
}

impl IdAllocator {
    pub fn new() -> IdAllocator {
        IdAllocator::default()
    }

    /// Claim `candidate`, or a `-2`/`-3`/… variant if it is already taken.
    /// The result always fits [`MAX_CUSTOM_ID_LEN`].
    pub fn claim(&mut self, candidate: &str) -> String {
        let candidate = truncate_chars(candidate, MAX_CUSTOM_ID_LEN);
        if self.used.insert(candidate.clone()) {
            return candidate;
        }
        let mut n = 2usize;
        loop {
            let tag = format!("-{n}");
            let keep = MAX_CUSTOM_ID_LEN.saturating_sub(tag.chars().count());
            let alternative = format!("{}{}", truncate_chars(&candidate, keep), tag);
            if self.used.insert(alternative.clone()) {
                return alternative;
            }
            n += 1;
        }
    }
}

/// Truncate to at most `max` characters, respecting char boundaries.
fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_stem("Q3 Report % Final"), "Q3_Report___Final");
        assert_eq!(sanitize_stem("Smith & Jones"), "Smith_and_Jones");
        assert_eq!(sanitize_stem("plain-name_ok"), "plain-name_ok");
    }

    #[test]
    fn stem_fits_ceiling_with_prefix_and_reserve() {
        let long_name = format!("{}.pdf", "x".repeat(200));
        let path = PathBuf::from(long_name);
        let reserve = page_chunk_suffix(10, 10).chars().count();
        let stem = stem_for_path(&path, "scan-", reserve);
        let full = format!("scan-{}{}", stem, page_chunk_suffix(10, 10));
        assert!(full.chars().count() <= MAX_CUSTOM_ID_LEN);
        // The budget should be fully used, not cut arbitrarily short.
        assert_eq!(full.chars().count(), MAX_CUSTOM_ID_LEN);
    }

    #[test]
    fn short_stems_are_untouched() {
        let stem = stem_for_path(Path::new("/tmp/paper one.pdf"), "summary-", 0);
        assert_eq!(stem, "paper_one");
    }

    #[test]
    fn strip_recovers_stem_for_every_prefix() {
        for prefix in KNOWN_PREFIXES {
            let id = format!("{prefix}some_doc-chunk2of3");
            assert_eq!(strip_known_prefix(&id), "some_doc-chunk2of3");
        }
        // Unknown prefixes pass through unchanged.
        assert_eq!(strip_known_prefix("other-thing"), "other-thing");
    }

    #[test]
    fn allocator_disambiguates_collisions() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.claim("summary-report"), "summary-report");
        assert_eq!(ids.claim("summary-report"), "summary-report-2");
        assert_eq!(ids.claim("summary-report"), "summary-report-3");
    }

    #[test]
    fn allocator_keeps_disambiguated_ids_within_ceiling() {
        let mut ids = IdAllocator::new();
        let candidate = "a".repeat(MAX_CUSTOM_ID_LEN);
        let first = ids.claim(&candidate);
        let second = ids.claim(&candidate);
        assert_eq!(first.chars().count(), MAX_CUSTOM_ID_LEN);
        assert!(second.chars().count() <= MAX_CUSTOM_ID_LEN);
        assert!(second.ends_with("-2"));
        assert_ne!(first, second);
    }

    #[test]
    fn fingerprint_is_short_and_stable() {
        let a = prompt_fingerprint("Summarize in {{word_count}} words.");
        let b = prompt_fingerprint("Summarize in {{word_count}} words.");
        let c = prompt_fingerprint("Different prompt.");
        assert_eq!(a.len(), 12);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
