//! Splitting large inputs into per-request chunks.
//!
//! Two kinds of chunking exist: page chunks for scanned-PDF vision requests
//! (bounded by an estimated per-page token cost against the model's context
//! budget) and word-based text chunks for embeddings.

/// Conservative estimate of tokens consumed per rasterized page image.
pub const TOKENS_PER_PAGE: usize = 3500;

/// Context budget that page chunks are sized against.
pub const MAX_CONTEXT_TOKENS: usize = 128_000;

/// Default pages per vision request.
pub const DEFAULT_PAGES_PER_CHUNK: usize = 30;

/// Largest page-chunk size that stays within the context budget.
pub fn max_safe_pages_per_chunk() -> usize {
    MAX_CONTEXT_TOKENS / TOKENS_PER_PAGE
}

/// Number of chunks needed to cover `total_pages`.
pub fn page_chunk_count(total_pages: usize, pages_per_chunk: usize) -> usize {
    total_pages.div_ceil(pages_per_chunk.max(1))
}

/// Split text into chunks of roughly `chunk_tokens` tokens apiece, using
/// simple word-based splitting (1 token ≈ 0.75 words).
pub fn chunk_words(text: &str, chunk_tokens: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let words_per_chunk = ((chunk_tokens as f64 * 0.75) as usize).max(1);
    words
        .chunks(words_per_chunk)
        .map(|chunk| chunk.join(" "))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_chunks_use_ceiling_division() {
        assert_eq!(page_chunk_count(61, 30), 3);
        assert_eq!(page_chunk_count(60, 30), 2);
        assert_eq!(page_chunk_count(30, 30), 1);
        assert_eq!(page_chunk_count(1, 30), 1);
    }

    #[test]
    fn context_budget_caps_chunk_size() {
        assert_eq!(max_safe_pages_per_chunk(), 36);
        assert!(DEFAULT_PAGES_PER_CHUNK <= max_safe_pages_per_chunk());
    }

    #[test]
    fn word_chunks_cover_all_words_in_order() {
        let text = "one two three four five six seven eight nine ten";
        // 4 tokens ≈ 3 words per chunk.
        let chunks = chunk_words(text, 4);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0], "one two three");
        assert_eq!(chunks[3], "ten");
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn word_chunking_handles_small_inputs() {
        assert_eq!(chunk_words("single", 2000), vec!["single".to_owned()]);
        assert!(chunk_words("", 2000).is_empty());
    }
}
