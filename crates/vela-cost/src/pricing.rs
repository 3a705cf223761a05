// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-tier pricing and cost calculation.
//!
//! Prices come from `[cost.pricing.<tier>]` in USD per million tokens.
//! Flat-rate tiers carry zero prices so their usage is still logged with
//! token counts and `cost = 0`.

use vela_config::model::{PricingConfig, TierPricing};
use vela_core::{Tier, TokenUsage};

/// Prices for all three tiers, indexed by [`Tier`].
#[derive(Debug, Clone)]
pub struct PricingTable {
    tiers: [TierPricing; 3],
}

impl PricingTable {
    pub fn from_config(config: &PricingConfig) -> Self {
        Self {
            tiers: [config.fast_local, config.mid_remote, config.heavy_agent],
        }
    }

    pub fn for_tier(&self, tier: Tier) -> &TierPricing {
        &self.tiers[tier.index()]
    }

    /// Cost in USD of `usage` on `tier`.
    pub fn cost(&self, tier: Tier, usage: &TokenUsage) -> f64 {
        calculate_cost(usage, self.for_tier(tier))
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::from_config(&PricingConfig::default())
    }
}

/// Sum over token kinds of `tokens / 1_000_000 * price_per_million`.
pub fn calculate_cost(usage: &TokenUsage, pricing: &TierPricing) -> f64 {
    let per_mtok = |tokens: u64, price: f64| (tokens as f64 / 1_000_000.0) * price;
    per_mtok(usage.input_tokens, pricing.input_per_mtok)
        + per_mtok(usage.output_tokens, pricing.output_per_mtok)
        + per_mtok(usage.cache_read_tokens, pricing.cache_read_per_mtok)
        + per_mtok(usage.cache_write_tokens, pricing.cache_write_per_mtok)
}
