// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-classification overrides: budget downgrades and the latency budget.
//!
//! Both are pure functions of the decision and the current figures, so the
//! dispatcher applies them in a fixed order and tests can drive them
//! without a ledger. Overrides only ever move a decision to a cheaper tier.

use std::time::Duration;

use tracing::info;
use vela_core::{BypassReason, RoutingDecision, Tier};
use vela_cost::BudgetStatus;
use vela_router::category;

fn downgrade(decision: RoutingDecision, tier: Tier, reason: BypassReason) -> RoutingDecision {
    info!(
        from = %decision.tier,
        to = %tier,
        reason = %reason,
        category = %decision.category,
        confidence = decision.confidence,
        "routing decision downgraded"
    );
    RoutingDecision {
        tier,
        bypass_reason: Some(reason),
        ..decision
    }
}

/// Apply the budget overrides in order: the hard ceiling, then thrifty mode.
///
/// Safety decisions pass through untouched.
pub fn apply_budget(
    decision: RoutingDecision,
    status: &BudgetStatus,
    thrifty_confidence_floor: f64,
) -> RoutingDecision {
    if decision.is_safety() {
        return decision;
    }
    if !status.can_use_paid_tier && decision.tier != Tier::FastLocal {
        return downgrade(decision, Tier::FastLocal, BypassReason::BudgetExceeded);
    }
    if status.thrifty_mode
        && decision.tier == Tier::MidRemote
        && decision.confidence < thrifty_confidence_floor
    {
        return downgrade(decision, Tier::FastLocal, BypassReason::ThriftyDowngrade);
    }
    decision
}

/// Move a heavy-agent decision to the mid tier when the caller's latency
/// budget cannot absorb the agent's startup overhead.
///
/// Safety and complex-task matches keep the heavy tier: the classification
/// explicitly requires it.
pub fn apply_latency_budget(
    decision: RoutingDecision,
    latency_budget: Option<Duration>,
    startup_overhead: Duration,
) -> RoutingDecision {
    let Some(budget) = latency_budget else {
        return decision;
    };
    let required = decision.is_safety()
        || decision.category == category::SAFETY
        || decision.category == category::COMPLEX_TASK;
    if decision.tier == Tier::HeavyAgent && !required && budget < startup_overhead {
        return downgrade(decision, Tier::MidRemote, BypassReason::LatencyBudget);
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;
    use vela_cost::BudgetLimits;

    fn limits() -> BudgetLimits {
        BudgetLimits {
            daily_limit_usd: 1.0,
            monthly_limit_usd: 10.0,
            soft_limit_fraction: 0.8,
        }
    }

    fn safety() -> RoutingDecision {
        RoutingDecision::new(Tier::HeavyAgent, 1.0, category::SAFETY)
            .with_bypass(BypassReason::SafetyKeyword)
    }

    #[test]
    #[traced_test]
    fn downgrade_is_logged_with_reason() {
        let status = BudgetStatus::compute(0.0, 9.0, &limits());
        apply_budget(
            RoutingDecision::new(Tier::MidRemote, 0.5, category::DEFAULT),
            &status,
            0.7,
        );
        assert!(logs_contain("routing decision downgraded"));
        assert!(logs_contain("reason=thrifty_downgrade"));
    }

    #[test]
    fn exhausted_budget_forces_fast_local() {
        let status = BudgetStatus::compute(0.2, 10.5, &limits());
        let out = apply_budget(
            RoutingDecision::new(Tier::HeavyAgent, 0.85, category::COMPLEX_TASK),
            &status,
            0.7,
        );
        assert_eq!(out.tier, Tier::FastLocal);
        assert_eq!(out.bypass_reason, Some(BypassReason::BudgetExceeded));
        assert_eq!(out.category, category::COMPLEX_TASK);
    }

    #[test]
    fn spent_daily_limit_keeps_paid_tiers() {
        let status = BudgetStatus::compute(1.5, 1.5, &limits());
        assert!(status.daily_limit_reached);
        let out = apply_budget(RoutingDecision::new(Tier::MidRemote, 0.9, "semantic"), &status, 0.7);
        assert_eq!(out.tier, Tier::MidRemote);
        assert_eq!(out.bypass_reason, None);
    }

    #[test]
    fn safety_is_exempt_from_every_override() {
        let exhausted = BudgetStatus::compute(5.0, 50.0, &limits());
        let out = apply_budget(safety(), &exhausted, 0.7);
        assert_eq!(out, safety());

        let out = apply_latency_budget(safety(), Some(Duration::from_millis(10)), Duration::from_secs(3));
        assert_eq!(out.tier, Tier::HeavyAgent);
    }

    #[test]
    fn thrifty_downgrades_low_confidence_mid() {
        let status = BudgetStatus::compute(0.0, 8.5, &limits());
        assert!(status.thrifty_mode);
        let out = apply_budget(RoutingDecision::new(Tier::MidRemote, 0.6, "semantic"), &status, 0.7);
        assert_eq!(out.tier, Tier::FastLocal);
        assert_eq!(out.bypass_reason, Some(BypassReason::ThriftyDowngrade));
    }

    #[test]
    fn thrifty_keeps_confident_mid_and_heavy() {
        let status = BudgetStatus::compute(0.0, 8.5, &limits());
        let mid = RoutingDecision::new(Tier::MidRemote, 0.7, "semantic");
        assert_eq!(apply_budget(mid.clone(), &status, 0.7), mid);
        let heavy = RoutingDecision::new(Tier::HeavyAgent, 0.3, "semantic");
        assert_eq!(apply_budget(heavy.clone(), &status, 0.7), heavy);
    }

    #[test]
    fn fast_local_is_never_touched() {
        let exhausted = BudgetStatus::compute(5.0, 50.0, &limits());
        let fast = RoutingDecision::new(Tier::FastLocal, 0.95, category::LOCAL_COMMAND);
        assert_eq!(apply_budget(fast.clone(), &exhausted, 0.7), fast);
    }

    #[test]
    fn tight_latency_budget_moves_long_query_to_mid() {
        let long = RoutingDecision::new(Tier::HeavyAgent, 0.75, category::LONG_QUERY);
        let out = apply_latency_budget(long.clone(), Some(Duration::from_secs(1)), Duration::from_secs(3));
        assert_eq!(out.tier, Tier::MidRemote);
        assert_eq!(out.bypass_reason, Some(BypassReason::LatencyBudget));

        let roomy = apply_latency_budget(long.clone(), Some(Duration::from_secs(5)), Duration::from_secs(3));
        assert_eq!(roomy, long);
        assert_eq!(apply_latency_budget(long.clone(), None, Duration::from_secs(3)), long);
    }

    #[test]
    fn complex_task_keeps_heavy_under_latency_budget() {
        let complex = RoutingDecision::new(Tier::HeavyAgent, 0.85, category::COMPLEX_TASK);
        let out = apply_latency_budget(complex.clone(), Some(Duration::ZERO), Duration::from_secs(3));
        assert_eq!(out, complex);
    }
}
