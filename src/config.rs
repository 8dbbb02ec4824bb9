//! Batch pipeline configuration.
//!
//! Non-secret settings live in a TOML file, normally `config.toml`. The API
//! token lives in the environment (usually via a `.env` file) and is loaded
//! separately by [`ApiKey::from_env`]. The two stores are never merged, and
//! the token is only ever displayed in redacted form.

use std::fmt;

use anyhow::anyhow;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::prelude::*;

/// Environment variable holding the API token.
pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Environment variable which overrides `[api].base_url` when set.
pub const API_BASE_VAR: &str = "OPENAI_API_BASE";

/// Non-secret configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// Where and how to reach the server.
    pub api: ApiConfig,
    /// Which models to use.
    pub models: ModelsConfig,
    /// Output sizing.
    #[serde(default)]
    pub output: OutputConfig,
    /// Batch job parameters.
    #[serde(default)]
    pub batch: BatchSettings,
    /// Safety ceilings checked before any batch file is written.
    #[serde(default)]
    pub safety: SafetyConfig,
    /// Rates used for rough cost estimates.
    #[serde(default)]
    pub pricing: PricingConfig,
}

impl BatchConfig {
    /// Load configuration from a TOML file.
    ///
    /// This is called explicitly at the start of each subcommand, so a broken
    /// or missing config turns into an ordinary error with remediation hints
    /// instead of a mystery failure halfway through a run.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<BatchConfig> {
        let data = tokio::fs::read_to_string(path).await.with_context(|| {
            format!(
                "failed to read config file {:?} (copy config.example.toml and edit it, \
                 or pass --config)",
                path.display()
            )
        })?;
        let config = toml::from_str(&data)
            .with_context(|| format!("failed to parse config file {:?}", path.display()))?;
        Ok(config)
    }
}

/// Server connection settings.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    /// Base URL of the OpenAI-compatible server.
    pub base_url: String,
    /// Sub-endpoint path used inside chat batch requests.
    #[serde(default = "default_chat_endpoint")]
    pub chat_completions_endpoint: String,
    /// Sub-endpoint path used inside embeddings batch requests.
    #[serde(default = "default_embeddings_endpoint")]
    pub embeddings_endpoint: String,
}

/// Which models to use for each request kind.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ModelsConfig {
    /// Model for chat and vision requests.
    pub default_model: String,
    /// Model for embeddings requests.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

/// Output sizing settings.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Per-request output token cap for chat and vision requests.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Target word count substituted into the prompt template as
    /// `{{word_count}}`.
    #[serde(default = "default_summary_word_count")]
    pub summary_word_count: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            max_tokens: default_max_tokens(),
            summary_word_count: default_summary_word_count(),
        }
    }
}

/// Batch job parameters.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct BatchSettings {
    /// Completion window passed at job creation time, e.g. "1h" or "24h".
    /// This is vendor-defined, so we pass it through as an opaque string.
    #[serde(default = "default_completion_window")]
    pub completion_window: String,
    /// Seconds to sleep between status probes while polling.
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        BatchSettings {
            completion_window: default_completion_window(),
            polling_interval: default_polling_interval(),
        }
    }
}

/// Safety ceilings for the cost estimator.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SafetyConfig {
    /// Maximum estimated input tokens per batch.
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: u64,
    /// Maximum worst-case output tokens per batch.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        SafetyConfig {
            max_input_tokens: default_max_input_tokens(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

/// Rates used for rough cost estimates.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    /// Fallback USD per million tokens.
    #[serde(default = "default_usd_per_mtok")]
    pub usd_per_mtok: f64,
    /// Per-model overrides, matched by substring in declaration order.
    #[serde(default)]
    pub tiers: Vec<PricingTier>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        PricingConfig {
            usd_per_mtok: default_usd_per_mtok(),
            tiers: vec![],
        }
    }
}

impl PricingConfig {
    /// Look up the rate for a model name.
    pub fn rate_for(&self, model: &str) -> f64 {
        self.tiers
            .iter()
            .find(|tier| model.contains(&tier.model_contains))
            .map(|tier| tier.usd_per_mtok)
            .unwrap_or(self.usd_per_mtok)
    }
}

/// One pricing override.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PricingTier {
    /// Substring to look for in the model name, e.g. "235B".
    pub model_contains: String,
    /// USD per million tokens for matching models.
    pub usd_per_mtok: f64,
}

fn default_chat_endpoint() -> String {
    "/v1/chat/completions".to_owned()
}

fn default_embeddings_endpoint() -> String {
    "/v1/embeddings".to_owned()
}

fn default_embedding_model() -> String {
    "BAAI/bge-en-icl".to_owned()
}

fn default_max_tokens() -> u32 {
    5000
}

fn default_summary_word_count() -> u32 {
    500
}

fn default_completion_window() -> String {
    "24h".to_owned()
}

fn default_polling_interval() -> u64 {
    30
}

fn default_max_input_tokens() -> u64 {
    1_000_000
}

fn default_max_output_tokens() -> u64 {
    500_000
}

fn default_usd_per_mtok() -> f64 {
    0.10
}

/// The API token, read from the environment.
///
/// Wrapped in its own type so that `Debug` and `Display` can never leak more
/// than the last few characters.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Read the API token from the environment. Only subcommands that talk to
    /// the server call this; building a batch file needs no credentials.
    pub fn from_env() -> Result<ApiKey> {
        match std::env::var(API_KEY_VAR) {
            Ok(key) if !key.trim().is_empty() => Ok(ApiKey(key)),
            _ => Err(anyhow!(
                "{API_KEY_VAR} is not set. Add it to your environment or to a `.env` \
                 file next to where you run this command."
            )),
        }
    }

    /// The full token, for constructing API clients.
    pub fn reveal(&self) -> &str {
        &self.0
    }

    /// The token with everything but the last four characters removed.
    pub fn redacted(&self) -> String {
        let chars = self.0.chars().count();
        let tail: String = self.0.chars().skip(chars.saturating_sub(4)).collect();
        format!("...{tail}")
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey({})", self.redacted())
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_parses_full_config() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        tokio::fs::write(
            &path,
            r#"
[api]
base_url = "https://api.example.com/v1"
chat_completions_endpoint = "/v1/chat/completions"
embeddings_endpoint = "/v1/embeddings"

[models]
default_model = "Qwen/Qwen3-VL-235B-A22B-Instruct-FP8"
embedding_model = "BAAI/bge-en-icl"

[output]
max_tokens = 500
summary_word_count = 300

[batch]
completion_window = "1h"
polling_interval = 10

[safety]
max_input_tokens = 2000000
max_output_tokens = 900000

[pricing]
usd_per_mtok = 0.10

[[pricing.tiers]]
model_contains = "235B"
usd_per_mtok = 0.125
"#,
        )
        .await?;

        let config = BatchConfig::load(&path).await?;
        assert_eq!(config.api.base_url, "https://api.example.com/v1");
        assert_eq!(config.models.default_model, "Qwen/Qwen3-VL-235B-A22B-Instruct-FP8");
        assert_eq!(config.output.max_tokens, 500);
        assert_eq!(config.batch.completion_window, "1h");
        assert_eq!(config.batch.polling_interval, 10);
        assert_eq!(config.safety.max_input_tokens, 2_000_000);
        assert_eq!(config.pricing.rate_for("Qwen/Qwen3-VL-235B"), 0.125);
        assert_eq!(config.pricing.rate_for("some-other-model"), 0.10);
        Ok(())
    }

    #[tokio::test]
    async fn load_applies_defaults_for_optional_tables() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        tokio::fs::write(
            &path,
            r#"
[api]
base_url = "http://localhost:8000/v1"

[models]
default_model = "test-model"
"#,
        )
        .await?;

        let config = BatchConfig::load(&path).await?;
        assert_eq!(config.api.chat_completions_endpoint, "/v1/chat/completions");
        assert_eq!(config.api.embeddings_endpoint, "/v1/embeddings");
        assert_eq!(config.models.embedding_model, "BAAI/bge-en-icl");
        assert_eq!(config.output.max_tokens, 5000);
        assert_eq!(config.output.summary_word_count, 500);
        assert_eq!(config.batch.completion_window, "24h");
        assert_eq!(config.batch.polling_interval, 30);
        assert_eq!(config.safety.max_input_tokens, 1_000_000);
        assert_eq!(config.safety.max_output_tokens, 500_000);
        Ok(())
    }

    #[tokio::test]
    async fn load_reports_missing_file_with_remediation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let err = BatchConfig::load(&path).await.unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("nope.toml"));
        assert!(msg.contains("config.example.toml"));
    }

    #[tokio::test]
    async fn load_rejects_unknown_keys() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        tokio::fs::write(
            &path,
            r#"
[api]
base_url = "http://localhost:8000/v1"
auth_token = "this-does-not-belong-here"

[models]
default_model = "test-model"
"#,
        )
        .await?;
        assert!(BatchConfig::load(&path).await.is_err());
        Ok(())
    }

    #[test]
    fn api_key_never_prints_more_than_last_four() {
        let key = ApiKey("sk-abcdef123456".to_owned());
        assert_eq!(key.redacted(), "...3456");
        assert_eq!(format!("{key}"), "...3456");
        assert!(!format!("{key:?}").contains("abcdef"));

        let short = ApiKey("abc".to_owned());
        assert_eq!(short.redacted(), "...abc");
    }
}
