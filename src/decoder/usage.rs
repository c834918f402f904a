//! Token usage normalisation across provider field names.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token counts for one provider call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetrics {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub reasoning_tokens: u64,
    pub cached_tokens: u64,
}

impl UsageMetrics {
    /// Read a raw usage object. Accepts both Responses-style
    /// (`input_tokens`/`output_tokens`) and chat-style
    /// (`prompt_tokens`/`completion_tokens`) names; missing totals are computed.
    pub fn from_raw(usage: Option<&Value>) -> Self {
        let Some(usage) = usage else {
            return Self::default();
        };

        let input_tokens = first_count(usage, &["input_tokens", "prompt_tokens"]);
        let output_tokens = first_count(usage, &["output_tokens", "completion_tokens"]);
        let total_tokens = count(usage.get("total_tokens"))
            .unwrap_or_else(|| input_tokens.saturating_add(output_tokens));
        let reasoning_tokens = nested_count(
            usage,
            &["output_tokens_details", "completion_tokens_details"],
            "reasoning_tokens",
        );
        let cached_tokens = nested_count(
            usage,
            &["input_tokens_details", "prompt_tokens_details"],
            "cached_tokens",
        );

        Self {
            input_tokens,
            output_tokens,
            total_tokens,
            reasoning_tokens,
            cached_tokens,
        }
    }
}

fn count(value: Option<&Value>) -> Option<u64> {
    value.and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
}

fn first_count(usage: &Value, names: &[&str]) -> u64 {
    names
        .iter()
        .find_map(|name| count(usage.get(*name)))
        .unwrap_or(0)
}

fn nested_count(usage: &Value, parents: &[&str], field: &str) -> u64 {
    parents
        .iter()
        .find_map(|parent| count(usage.get(*parent).and_then(|details| details.get(field))))
        .unwrap_or(0)
}
