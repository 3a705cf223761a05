// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Vela dispatcher.
//!
//! Recoverable conditions (embedding failures, budget downgrades, open
//! breakers with a cheaper tier available) are handled inside the
//! dispatcher. Only terminal conditions reach the caller, and each one is
//! tagged with an [`ErrorKind`] so front ends can pick their own wording.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::types::Tier;

/// The primary error type used across all Vela crates.
#[derive(Debug, Error)]
pub enum VelaError {
    /// Configuration errors (invalid TOML, failed validation, bad patterns).
    #[error("configuration error: {0}")]
    Config(String),

    /// Durable store errors (database open, migration, query failure).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The semantic stage could not produce a score.
    #[error("classification unavailable: {message}")]
    ClassificationUnavailable { message: String },

    /// Spend ceiling reached and the free tier could not serve the request.
    #[error("budget exceeded: {message}")]
    BudgetExceeded { message: String },

    /// The tier's circuit breaker is open; the call was not attempted.
    #[error("tier {tier} unavailable: circuit breaker open")]
    BreakerOpen { tier: Tier },

    /// Every eligible tier is open or exhausted.
    #[error("all tiers unavailable")]
    AllTiersUnavailable,

    /// Rate limits, overload responses, dropped connections.
    #[error("transient backend error on {tier}: {message}")]
    BackendTransient { tier: Tier, message: String },

    /// No first fragment within the tier's deadline.
    #[error("{tier} timed out after {duration:?}")]
    Timeout { tier: Tier, duration: Duration },

    /// Authentication or request validation failure; never retried.
    #[error("fatal backend error on {tier}: {message}")]
    BackendFatal { tier: Tier, message: String },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Stable tag describing the kind of a [`VelaError`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Storage,
    ClassificationUnavailable,
    BudgetExceeded,
    BreakerOpen,
    AllTiersUnavailable,
    BackendTransient,
    Timeout,
    BackendFatal,
    Internal,
}

impl VelaError {
    /// Returns the stable kind tag for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::ClassificationUnavailable { .. } => ErrorKind::ClassificationUnavailable,
            Self::BudgetExceeded { .. } => ErrorKind::BudgetExceeded,
            Self::BreakerOpen { .. } => ErrorKind::BreakerOpen,
            Self::AllTiersUnavailable => ErrorKind::AllTiersUnavailable,
            Self::BackendTransient { .. } => ErrorKind::BackendTransient,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::BackendFatal { .. } => ErrorKind::BackendFatal,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a retry of the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BackendTransient { .. } | Self::Timeout { .. })
    }

    /// Whether this error should trip the tier's breaker immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BackendFatal { .. })
    }

    /// The tier a backend error originated from, if any.
    pub fn tier(&self) -> Option<Tier> {
        match self {
            Self::BreakerOpen { tier }
            | Self::BackendTransient { tier, .. }
            | Self::Timeout { tier, .. }
            | Self::BackendFatal { tier, .. } => Some(*tier),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_timeout_are_retryable() {
        let transient = VelaError::BackendTransient {
            tier: Tier::MidRemote,
            message: "429".into(),
        };
        let timeout = VelaError::Timeout {
            tier: Tier::FastLocal,
            duration: Duration::from_secs(2),
        };
        assert!(transient.is_transient());
        assert!(timeout.is_transient());
        assert!(!transient.is_fatal());
    }

    #[test]
    fn fatal_is_never_retryable() {
        let fatal = VelaError::BackendFatal {
            tier: Tier::MidRemote,
            message: "invalid x-api-key".into(),
        };
        assert!(!fatal.is_transient());
        assert!(fatal.is_fatal());
        assert_eq!(fatal.kind(), ErrorKind::BackendFatal);
        assert_eq!(fatal.tier(), Some(Tier::MidRemote));
    }

    #[test]
    fn kind_tags_are_snake_case() {
        assert_eq!(
            VelaError::AllTiersUnavailable.kind().to_string(),
            "all_tiers_unavailable"
        );
        let open = VelaError::BreakerOpen {
            tier: Tier::HeavyAgent,
        };
        assert_eq!(open.kind().to_string(), "breaker_open");
        assert_eq!(open.to_string(), "tier heavy_agent unavailable: circuit breaker open");
    }
}
