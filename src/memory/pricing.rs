//! Token pricing and conversation cost accounting
//!
//! Prices are kept per million tokens. Messages authored by the model are
//! priced as output; everything else (system, user, tool) is input. Unknown
//! models fall back to a default pricing row with a logged warning rather
//! than failing the call.

use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Price of a model per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// USD per million input tokens
    pub input_per_million: f64,
    /// USD per million output tokens
    pub output_per_million: f64,
}

/// Pricing lookup table with a default fallback row
#[derive(Debug, Clone)]
pub struct PricingTable {
    models: HashMap<String, ModelPricing>,
    fallback: String,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut models = HashMap::new();
        models.insert(
            "gpt-4o-mini".to_string(),
            ModelPricing {
                input_per_million: 0.15,
                output_per_million: 0.60,
            },
        );
        models.insert(
            "gpt-4o".to_string(),
            ModelPricing {
                input_per_million: 2.50,
                output_per_million: 10.00,
            },
        );
        models.insert(
            "gpt-4".to_string(),
            ModelPricing {
                input_per_million: 30.00,
                output_per_million: 60.00,
            },
        );
        Self {
            models,
            fallback: "gpt-4o-mini".to_string(),
        }
    }
}

impl PricingTable {
    /// Adds or replaces a pricing row
    pub fn insert(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.models.insert(model.into(), pricing);
    }

    /// Looks up a model's pricing, falling back to the default row
    ///
    /// Unknown models are priced as the fallback model and logged.
    pub fn lookup(&self, model: &str) -> ModelPricing {
        if let Some(pricing) = self.models.get(model) {
            return *pricing;
        }
        tracing::warn!(model, fallback = %self.fallback, "unknown model, using fallback pricing");
        self.models
            .get(&self.fallback)
            .copied()
            .unwrap_or(ModelPricing {
                input_per_million: 0.0,
                output_per_million: 0.0,
            })
    }

    /// Whether the table has an explicit row for `model`
    pub fn contains(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }
}

/// Splits a conversation's token counts into input and output
///
/// Returns `(input_tokens, output_tokens)`.
pub fn split_tokens(messages: &[Message]) -> (usize, usize) {
    let mut input = 0;
    let mut output = 0;
    for message in messages {
        if message.role.is_model_output() {
            output += message.token_count;
        } else {
            input += message.token_count;
        }
    }
    (input, output)
}

/// Prices a conversation under the given pricing row
pub fn conversation_cost(messages: &[Message], pricing: ModelPricing) -> f64 {
    let (input, output) = split_tokens(messages);
    (input as f64 * pricing.input_per_million + output as f64 * pricing.output_per_million)
        / 1_000_000.0
}
