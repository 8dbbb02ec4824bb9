//! Loading and rendering prompt templates.

use anyhow::anyhow;
use handlebars::Handlebars;
use serde_json::{Map, Value};

use crate::prelude::*;

/// A prompt template read from a plain-text file.
///
/// Templates may use Handlebars placeholders. We currently bind
/// `word_count`, taken from the `[output]` configuration. Plain text without
/// any `{{...}}` placeholders passes through unchanged.
#[derive(Clone, Debug)]
pub struct PromptTemplate {
    /// The template source text.
    source: String,
}

impl PromptTemplate {
    /// Load a template from a file.
    pub async fn load(path: &Path) -> Result<Self> {
        let source = tokio::fs::read_to_string(path).await.with_context(|| {
            format!("failed to read prompt file {:?}", path.display())
        })?;
        if source.trim().is_empty() {
            return Err(anyhow!("prompt file {:?} is empty", path.display()));
        }
        Ok(Self { source })
    }

    /// Create a template directly from source text.
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Render the template with our standard bindings.
    pub fn render(&self, word_count: u32) -> Result<String> {
        let handlebars = Handlebars::new();
        let mut bindings = Map::new();
        bindings.insert("word_count".to_owned(), Value::from(word_count));
        let rendered = handlebars
            .render_template(&self.source, &bindings)
            .context("failed to render prompt template")?;
        Ok(rendered.trim().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        let template = PromptTemplate::from_source("Summarize this document.\n");
        let rendered = template.render(500).expect("should render");
        assert_eq!(rendered, "Summarize this document.");
    }

    #[test]
    fn word_count_binding_is_substituted() {
        let template =
            PromptTemplate::from_source("Summarize in {{word_count}} words.");
        let rendered = template.render(250).expect("should render");
        assert_eq!(rendered, "Summarize in 250 words.");
    }

    #[tokio::test]
    async fn empty_prompt_file_is_rejected() {
        let dir = tempfile::tempdir().expect("should create tempdir");
        let path = dir.path().join("prompt.txt");
        std::fs::write(&path, "  \n").expect("should write file");
        let err = PromptTemplate::load(&path)
            .await
            .expect_err("should reject empty prompt");
        assert!(format!("{err}").contains("empty"));
    }
}
