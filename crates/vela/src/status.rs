// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `vela status` command implementation.
//!
//! Probes each tier's backend and prints its health next to the breaker
//! state. Breakers live in memory, so a fresh process always reports them
//! closed; the probe results are what tell a tier is reachable.

use std::io::IsTerminal;

use colored::Colorize;
use serde::Serialize;
use vela_config::VelaConfig;
use vela_core::{HealthStatus, Tier, VelaError};
use vela_resilience::CircuitState;

use crate::app;

#[derive(Debug, Serialize)]
pub struct TierStatus {
    pub tier: Tier,
    pub healthy: bool,
    pub detail: Option<String>,
    pub breaker: CircuitState,
}

fn split_health(status: HealthStatus) -> (bool, Option<String>) {
    match status {
        HealthStatus::Healthy => (true, None),
        HealthStatus::Degraded(detail) => (true, Some(detail)),
        HealthStatus::Unhealthy(detail) => (false, Some(detail)),
    }
}

/// Runs `vela status`.
pub async fn run_status(config: &VelaConfig, json: bool, plain: bool) -> Result<(), VelaError> {
    let dispatcher = app::build_dispatcher(config).await?;
    let breakers = dispatcher.breaker_snapshots();

    let tiers: Vec<TierStatus> = dispatcher
        .health()
        .await
        .into_iter()
        .map(|(tier, health)| {
            let (healthy, detail) = split_health(health);
            let breaker = breakers
                .iter()
                .find(|b| b.tier == tier)
                .map(|b| b.state)
                .unwrap_or(CircuitState::Closed);
            TierStatus {
                tier,
                healthy,
                detail,
                breaker,
            }
        })
        .collect();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&tiers).unwrap_or_else(|_| "[]".to_string())
        );
        return Ok(());
    }

    let use_color = !plain && std::io::stdout().is_terminal();
    for t in &tiers {
        let state = if t.healthy { "up" } else { "down" };
        let state = match (use_color, t.healthy) {
            (false, _) => state.normal(),
            (true, true) => state.green(),
            (true, false) => state.red(),
        };
        let detail = t.detail.as_deref().unwrap_or("");
        println!(
            "{:<12} {:<5} breaker {:<9} {}",
            t.tier.to_string(),
            state,
            t.breaker.to_string(),
            detail
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_counts_as_healthy_with_detail() {
        assert_eq!(split_health(HealthStatus::Healthy), (true, None));
        assert_eq!(
            split_health(HealthStatus::Degraded("model missing".into())),
            (true, Some("model missing".into()))
        );
        assert!(!split_health(HealthStatus::Unhealthy("refused".into())).0);
    }
}
