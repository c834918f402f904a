//! Per-model token pricing.

use crate::decoder::UsageMetrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPrice {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }
}

/// Built-in prices, keyed by model-name prefix.
pub fn default_prices() -> BTreeMap<String, ModelPrice> {
    [
        ("gpt-4.1", ModelPrice::new(2.0, 8.0)),
        ("gpt-4.1-mini", ModelPrice::new(0.4, 1.6)),
        ("gpt-4.1-nano", ModelPrice::new(0.1, 0.4)),
        ("gpt-4o", ModelPrice::new(2.5, 10.0)),
        ("gpt-4o-mini", ModelPrice::new(0.15, 0.6)),
        ("o4-mini", ModelPrice::new(1.1, 4.4)),
    ]
    .into_iter()
    .map(|(prefix, price)| (prefix.to_string(), price))
    .collect()
}

/// Prices looked up by the longest prefix of the model name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PricingTable {
    prices: BTreeMap<String, ModelPrice>,
}

impl PricingTable {
    pub fn new(prices: BTreeMap<String, ModelPrice>) -> Self {
        Self { prices }
    }

    pub fn price_for(&self, model: &str) -> Option<&ModelPrice> {
        self.prices
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, price)| price)
    }

    /// Cost in USD; unknown models cost nothing.
    pub fn cost(&self, model: &str, usage: &UsageMetrics) -> f64 {
        match self.price_for(model) {
            Some(price) => {
                usage.input_tokens as f64 * price.input_per_million / 1_000_000.0
                    + usage.output_tokens as f64 * price.output_per_million / 1_000_000.0
            }
            None => 0.0,
        }
    }
}
