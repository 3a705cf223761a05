// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cost tracking and budget governance for the Vela dispatcher.
//!
//! This crate provides:
//! - **Usage ledger**: one immutable row per tier invocation, with rolling
//!   UTC day and month aggregates maintained in the same transaction
//! - **Budget ledger**: `record` / `status` / `configure` with thrifty mode
//!   and the paid-tier gate
//! - **Pricing**: per-tier cost calculation from configured per-MTok rates

pub mod budget;
pub mod ledger;
pub mod pricing;

pub use budget::{BudgetLedger, BudgetLimits, BudgetStatus};
pub use ledger::{TierSpend, UsageLedger, UsageOutcome, UsageRecord};
pub use pricing::PricingTable;
