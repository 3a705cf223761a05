// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resilience primitives guarding each tier: a circuit breaker per tier
//! and the retry policy applied to individual attempts.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    BreakerSettings, BreakerSnapshot, CircuitBreaker, CircuitBreakerRegistry, CircuitState,
};
pub use retry::RetryPolicy;
