// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Budget ledger: durable spend tracking with daily and monthly limits.
//!
//! Spend figures are read from the rolling aggregates on every
//! [`BudgetLedger::status`] call, so the status is never stale and
//! survives restarts. Limits live in memory and start from `[cost]`.
//! Day and month boundaries are UTC.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use vela_config::model::CostConfig;
use vela_core::VelaError;
use vela_storage::Database;

use crate::ledger::{TierSpend, UsageLedger, UsageRecord};
use crate::pricing::PricingTable;

/// Spend limits applied by [`BudgetLedger::status`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetLimits {
    pub daily_limit_usd: f64,
    pub monthly_limit_usd: f64,
    /// Monthly fraction above which thrifty mode engages.
    pub soft_limit_fraction: f64,
}

impl BudgetLimits {
    pub fn from_config(config: &CostConfig) -> Self {
        Self {
            daily_limit_usd: config.daily_limit_usd,
            monthly_limit_usd: config.monthly_limit_usd,
            soft_limit_fraction: config.soft_limit_fraction,
        }
    }
}

/// Point-in-time view of spend against limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetStatus {
    pub daily_spend: f64,
    pub monthly_spend: f64,
    pub daily_limit: f64,
    pub monthly_limit: f64,
    /// Monthly spend is above the soft-limit fraction of the monthly limit.
    pub thrifty_mode: bool,
    /// Monthly spend is below the monthly limit.
    pub can_use_paid_tier: bool,
    /// Daily spend has reached the daily limit. Reported only; routing is
    /// gated by the monthly limit alone.
    pub daily_limit_reached: bool,
}

impl BudgetStatus {
    pub fn compute(daily_spend: f64, monthly_spend: f64, limits: &BudgetLimits) -> Self {
        Self {
            daily_spend,
            monthly_spend,
            daily_limit: limits.daily_limit_usd,
            monthly_limit: limits.monthly_limit_usd,
            thrifty_mode: monthly_spend > limits.soft_limit_fraction * limits.monthly_limit_usd,
            can_use_paid_tier: monthly_spend < limits.monthly_limit_usd,
            daily_limit_reached: daily_spend >= limits.daily_limit_usd,
        }
    }

    /// Fraction of the monthly limit spent, or 0 for a zero limit.
    pub fn monthly_fraction(&self) -> f64 {
        if self.monthly_limit > 0.0 {
            self.monthly_spend / self.monthly_limit
        } else {
            0.0
        }
    }
}

/// Durable usage ledger plus the limits it is judged against.
pub struct BudgetLedger {
    ledger: UsageLedger,
    pricing: PricingTable,
    limits: RwLock<BudgetLimits>,
}

impl BudgetLedger {
    pub fn new(db: Database, config: &CostConfig) -> Self {
        Self {
            ledger: UsageLedger::new(db),
            pricing: PricingTable::from_config(&config.pricing),
            limits: RwLock::new(BudgetLimits::from_config(config)),
        }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    /// Persist a record. Returns only once the row and aggregates are committed.
    pub async fn record(&self, record: &UsageRecord) -> Result<(), VelaError> {
        self.ledger.record(record).await
    }

    /// Status for the current UTC day and month.
    pub async fn status(&self) -> Result<BudgetStatus, VelaError> {
        self.status_at(Utc::now()).await
    }

    /// Status for the UTC day and month containing `now`.
    pub async fn status_at(&self, now: DateTime<Utc>) -> Result<BudgetStatus, VelaError> {
        let (daily, monthly) = self.ledger.spend_at(now).await?;
        let status = BudgetStatus::compute(daily, monthly, &self.limits());
        if !status.can_use_paid_tier {
            debug!(
                monthly_spend = status.monthly_spend,
                monthly_limit = status.monthly_limit,
                "monthly limit reached, paid tiers disabled"
            );
        } else if status.thrifty_mode {
            debug!(
                monthly_spend = status.monthly_spend,
                monthly_limit = status.monthly_limit,
                "approaching monthly budget, thrifty mode"
            );
        }
        Ok(status)
    }

    /// Replace the daily and monthly limits used by subsequent status calls.
    pub fn configure(&self, daily_limit_usd: f64, monthly_limit_usd: f64) -> Result<(), VelaError> {
        for (name, value) in [("daily", daily_limit_usd), ("monthly", monthly_limit_usd)] {
            if !value.is_finite() || value < 0.0 {
                return Err(VelaError::Config(format!(
                    "{name} limit must be a non-negative amount, got {value}"
                )));
            }
        }
        let mut limits = self
            .limits
            .write()
            .map_err(|_| VelaError::Internal("budget limits lock poisoned".into()))?;
        limits.daily_limit_usd = daily_limit_usd;
        limits.monthly_limit_usd = monthly_limit_usd;
        info!(daily_limit_usd, monthly_limit_usd, "budget limits updated");
        Ok(())
    }

    pub fn limits(&self) -> BudgetLimits {
        match self.limits.read() {
            Ok(limits) => *limits,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Per-tier totals for the current UTC month.
    pub async fn tier_breakdown(&self) -> Result<Vec<TierSpend>, VelaError> {
        self.ledger.tier_breakdown(Utc::now()).await
    }
}
