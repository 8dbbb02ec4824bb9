//! Token and cost estimation for built batches.
//!
//! These are deliberately coarse heuristics for operator review before
//! submission, not billing-grade accounting: roughly four characters per
//! input token, and the full `max_tokens` ceiling charged for every
//! request's output.

use std::fmt;

use crate::config::{PricingConfig, SafetyConfig};

/// Assumed characters per input token.
pub const CHARS_PER_TOKEN: u64 = 4;

/// Estimated resource usage for a built batch.
#[derive(Clone, Debug)]
pub struct BatchEstimate {
    /// Number of requests in the batch.
    pub request_count: usize,

    /// Total characters of input (document text plus prompt) across all
    /// requests.
    pub input_chars: u64,

    /// Estimated input tokens.
    pub input_tokens: u64,

    /// Estimated output tokens, assuming every request uses its full
    /// `max_tokens` budget. Zero for embedding batches.
    pub output_tokens: u64,

    /// Estimated cost in US dollars.
    pub estimated_cost_usd: f64,
}

impl BatchEstimate {
    /// Estimate the resource usage of a batch.
    pub fn new(
        request_count: usize,
        input_chars: u64,
        max_tokens: u32,
        model: &str,
        pricing: &PricingConfig,
    ) -> Self {
        let input_tokens = input_chars / CHARS_PER_TOKEN;
        let output_tokens = request_count as u64 * u64::from(max_tokens);
        let rate = pricing.rate_for(model);
        let estimated_cost_usd =
            (input_tokens + output_tokens) as f64 / 1_000_000.0 * rate;
        Self {
            request_count,
            input_chars,
            input_tokens,
            output_tokens,
            estimated_cost_usd,
        }
    }

    /// Compare this estimate against the configured ceilings, returning
    /// every limit it breaks.
    pub fn safety_violations(&self, safety: &SafetyConfig) -> Vec<SafetyViolation> {
        let mut violations = Vec::new();
        if self.input_tokens > safety.max_input_tokens {
            violations.push(SafetyViolation {
                kind: SafetyLimit::InputTokens,
                estimated: self.input_tokens,
                limit: safety.max_input_tokens,
            });
        }
        if self.output_tokens > safety.max_output_tokens {
            violations.push(SafetyViolation {
                kind: SafetyLimit::OutputTokens,
                estimated: self.output_tokens,
                limit: safety.max_output_tokens,
            });
        }
        violations
    }
}

/// Which configured ceiling a batch would break.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SafetyLimit {
    /// The `[safety] max_input_tokens` ceiling.
    InputTokens,
    /// The `[safety] max_output_tokens` ceiling.
    OutputTokens,
}

/// A broken ceiling, with the numbers an operator needs to decide whether to
/// re-run with `--force`.
#[derive(Clone, Debug)]
pub struct SafetyViolation {
    /// Which ceiling was broken.
    pub kind: SafetyLimit,

    /// The estimated token count.
    pub estimated: u64,

    /// The configured ceiling.
    pub limit: u64,
}

impl fmt::Display for SafetyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            SafetyLimit::InputTokens => "input tokens",
            SafetyLimit::OutputTokens => "output tokens",
        };
        write!(
            f,
            "estimated {} ({}) exceed the configured limit ({})",
            what, self.estimated, self.limit
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::config::PricingTier;

    use super::*;

    #[test]
    fn three_documents_with_shared_prompt() {
        // Three 1000-character documents, each paired with a 200-character
        // prompt, with a 500 token output ceiling per request.
        let input_chars = 3 * (1000 + 200);
        let estimate = BatchEstimate::new(
            3,
            input_chars,
            500,
            "any-model",
            &PricingConfig::default(),
        );
        assert_eq!(estimate.input_tokens, 900);
        assert_eq!(estimate.output_tokens, 1500);
        let expected_cost = 2400.0 / 1_000_000.0 * 0.10;
        assert!((estimate.estimated_cost_usd - expected_cost).abs() < 1e-12);
    }

    #[test]
    fn pricing_tier_is_selected_by_model_substring() {
        let pricing = PricingConfig {
            usd_per_mtok: 0.10,
            tiers: vec![PricingTier {
                model_contains: "235B".to_owned(),
                usd_per_mtok: 0.125,
            }],
        };
        let estimate =
            BatchEstimate::new(1, 4_000_000, 0, "Qwen/Qwen3-VL-235B", &pricing);
        assert_eq!(estimate.input_tokens, 1_000_000);
        assert!((estimate.estimated_cost_usd - 0.125).abs() < 1e-12);
    }

    #[test]
    fn violations_name_every_broken_ceiling() {
        let safety = SafetyConfig {
            max_input_tokens: 1000,
            max_output_tokens: 500,
        };
        let estimate = BatchEstimate::new(
            10,
            8000,
            100,
            "any-model",
            &PricingConfig::default(),
        );
        let violations = estimate.safety_violations(&safety);
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].kind, SafetyLimit::InputTokens);
        assert_eq!(violations[1].kind, SafetyLimit::OutputTokens);
        let message = violations[0].to_string();
        assert!(message.contains("2000"));
        assert!(message.contains("1000"));
    }

    #[test]
    fn batch_within_ceilings_has_no_violations() {
        let estimate = BatchEstimate::new(
            3,
            3600,
            500,
            "any-model",
            &PricingConfig::default(),
        );
        assert!(estimate.safety_violations(&SafetyConfig::default()).is_empty());
    }
}
