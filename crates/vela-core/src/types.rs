// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the classifier, the ledger, and the tier clients.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter behind a [`crate::PluginAdapter`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    TierClient,
    Embedding,
}

/// One of the three execution backends, ordered by increasing cost and latency.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    FastLocal,
    MidRemote,
    HeavyAgent,
}

impl Tier {
    /// All tiers, cheapest first.
    pub const ALL: [Tier; 3] = [Tier::FastLocal, Tier::MidRemote, Tier::HeavyAgent];

    /// The next cheaper tier, or `None` for [`Tier::FastLocal`].
    pub fn cheaper(self) -> Option<Tier> {
        match self {
            Tier::FastLocal => None,
            Tier::MidRemote => Some(Tier::FastLocal),
            Tier::HeavyAgent => Some(Tier::MidRemote),
        }
    }

    /// Stable index into per-tier arrays.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Why a routing decision bypassed the normal cascade or was overridden.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BypassReason {
    /// A safety pattern matched; exempt from every downgrade.
    SafetyKeyword,
    /// Spend ceiling reached; forced to the free tier.
    BudgetExceeded,
    /// Thrifty mode moved a low-confidence decision to the free tier.
    ThriftyDowngrade,
    /// The caller's latency budget cannot absorb heavy-agent startup.
    LatencyBudget,
}

/// The classifier's verdict for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub tier: Tier,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub category: String,
    pub bypass_reason: Option<BypassReason>,
}

impl RoutingDecision {
    /// Creates a decision, clamping confidence into `[0, 1]`.
    pub fn new(tier: Tier, confidence: f64, category: impl Into<String>) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            tier,
            confidence,
            category: category.into(),
            bypass_reason: None,
        }
    }

    pub fn with_bypass(mut self, reason: BypassReason) -> Self {
        self.bypass_reason = Some(reason);
        self
    }

    /// Safety decisions are never downgraded.
    pub fn is_safety(&self) -> bool {
        self.bypass_reason == Some(BypassReason::SafetyKeyword)
    }
}

/// Token counts reported by a backend for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Self::default()
        }
    }
}

/// The trailer that terminates every tier stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub usage: TokenUsage,
    /// Milliseconds from the call to the first fragment, if one arrived.
    pub first_fragment_ms: Option<u64>,
    pub total_ms: u64,
}

/// One item of a tier stream: a text fragment or the closing summary.
#[derive(Debug, Clone, PartialEq)]
pub enum TierEvent {
    Fragment(String),
    Done(UsageSummary),
}

/// Parameters of a single generation call, uniform across tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

/// Tracks first-fragment and total latency for a tier stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamTimer {
    started: Instant,
    first_fragment: Option<Instant>,
}

impl StreamTimer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            first_fragment: None,
        }
    }

    /// Records a fragment; only the first call has any effect.
    pub fn mark_fragment(&mut self) {
        if self.first_fragment.is_none() {
            self.first_fragment = Some(Instant::now());
        }
    }

    pub fn first_fragment_ms(&self) -> Option<u64> {
        self.first_fragment
            .map(|t| t.duration_since(self.started).as_millis() as u64)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn summary(&self, usage: TokenUsage) -> UsageSummary {
        UsageSummary {
            usage,
            first_fragment_ms: self.first_fragment_ms(),
            total_ms: self.elapsed_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn tiers_are_ordered_by_cost() {
        assert!(Tier::FastLocal < Tier::MidRemote);
        assert!(Tier::MidRemote < Tier::HeavyAgent);
        assert_eq!(Tier::HeavyAgent.cheaper(), Some(Tier::MidRemote));
        assert_eq!(Tier::MidRemote.cheaper(), Some(Tier::FastLocal));
        assert_eq!(Tier::FastLocal.cheaper(), None);
    }

    #[test]
    fn tier_display_round_trips() {
        for tier in Tier::ALL {
            let parsed = Tier::from_str(&tier.to_string()).expect("should parse back");
            assert_eq!(tier, parsed);
        }
        assert_eq!(Tier::MidRemote.to_string(), "mid_remote");
    }

    #[test]
    fn bypass_reason_strings() {
        assert_eq!(BypassReason::SafetyKeyword.to_string(), "safety_keyword");
        assert_eq!(BypassReason::ThriftyDowngrade.to_string(), "thrifty_downgrade");
        assert_eq!(
            serde_json::to_string(&BypassReason::BudgetExceeded).unwrap(),
            "\"budget_exceeded\""
        );
    }

    #[test]
    fn decision_confidence_is_clamped() {
        assert_eq!(RoutingDecision::new(Tier::FastLocal, 1.7, "x").confidence, 1.0);
        assert_eq!(RoutingDecision::new(Tier::FastLocal, -0.2, "x").confidence, 0.0);
        assert_eq!(RoutingDecision::new(Tier::FastLocal, f64::NAN, "x").confidence, 0.0);
    }

    #[test]
    fn safety_flag() {
        let d = RoutingDecision::new(Tier::HeavyAgent, 1.0, "safety")
            .with_bypass(BypassReason::SafetyKeyword);
        assert!(d.is_safety());
        assert!(!RoutingDecision::new(Tier::HeavyAgent, 1.0, "safety").is_safety());
    }

    #[test]
    fn timer_records_first_fragment_once() {
        let mut timer = StreamTimer::start();
        assert!(timer.first_fragment_ms().is_none());
        timer.mark_fragment();
        let first = timer.first_fragment_ms();
        timer.mark_fragment();
        assert_eq!(timer.first_fragment_ms(), first);
        let summary = timer.summary(TokenUsage::new(3, 4));
        assert_eq!(summary.usage.output_tokens, 4);
        assert!(summary.total_ms >= summary.first_fragment_ms.unwrap_or(0));
    }

    proptest::proptest! {
        #[test]
        fn confidence_always_in_unit_interval(c in proptest::num::f64::ANY) {
            let d = RoutingDecision::new(Tier::MidRemote, c, "any");
            proptest::prop_assert!((0.0..=1.0).contains(&d.confidence));
        }
    }
}
