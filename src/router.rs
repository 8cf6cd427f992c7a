//! Model routing.
//!
//! Picks the target model for an assembled prompt from configured tiers,
//! cheapest first. Token count selects the base tier, a complexity signal
//! above the tier's cap bumps the decision one tier up, and the
//! prefer-local flag short-circuits to the local model when one is
//! configured.

use tracing::debug;

use crate::config::RouterConfig;

pub struct ModelRouter {
    config: RouterConfig,
}

impl ModelRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    pub fn select(&self, total_tokens: usize, complexity: f64) -> String {
        if self.config.prefer_local {
            if let Some(local) = &self.config.local_model {
                return local.clone();
            }
        }

        let complexity = complexity.clamp(0.0, 1.0);
        let tiers = &self.config.tiers;
        let mut index = tiers
            .iter()
            .position(|t| total_tokens <= t.max_tokens)
            .unwrap_or(tiers.len() - 1);

        if complexity > tiers[index].complexity_cap && index + 1 < tiers.len() {
            index += 1;
        }

        let model = tiers[index].model_id.clone();
        debug!(total_tokens, complexity, model = %model, "Routed prompt");
        model
    }
}
