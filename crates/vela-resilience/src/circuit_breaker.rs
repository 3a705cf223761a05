// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-tier circuit breaker.
//!
//! ```text
//! CLOSED --fail_max consecutive failures--> OPEN
//! OPEN   --reset_timeout elapsed----------> HALF_OPEN (one probe admitted)
//! HALF_OPEN --probe succeeds--------------> CLOSED
//! HALF_OPEN --probe fails-----------------> OPEN
//! ```
//!
//! A fatal backend error trips the breaker straight to OPEN. State is held
//! in memory only, so every process starts CLOSED. The lock is a plain
//! mutex held for a few field updates and never across an `.await`.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use strum::Display;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vela_config::model::ResilienceConfig;
use vela_core::{Tier, VelaError};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    pub fail_max: u32,
    pub reset_timeout: Duration,
}

impl BreakerSettings {
    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self {
            fail_max: config.fail_max.max(1),
            reset_timeout: Duration::from_secs(config.reset_timeout_secs),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::from_config(&ResilienceConfig::default())
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Read-only view of a breaker for status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub tier: Tier,
    pub state: CircuitState,
    pub failure_count: u32,
    pub opened_at: Option<Instant>,
}

impl BreakerSnapshot {
    /// Time left before an open breaker admits a probe.
    pub fn retry_in(&self, reset_timeout: Duration) -> Option<Duration> {
        match (self.state, self.opened_at) {
            (CircuitState::Open, Some(at)) => Some(reset_timeout.saturating_sub(at.elapsed())),
            _ => None,
        }
    }
}

/// Failure-counting fast-fail guard for one tier.
#[derive(Debug)]
pub struct CircuitBreaker {
    tier: Tier,
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(tier: Tier, settings: BreakerSettings) -> Self {
        Self {
            tier,
            settings,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn settings(&self) -> BreakerSettings {
        self.settings
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every update leaves the fields consistent, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Ask to send one call to the backend.
    ///
    /// Fails fast with [`VelaError::BreakerOpen`] while open, and while a
    /// half-open probe is already in flight.
    pub fn allow(&self) -> Result<(), VelaError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed());
                if elapsed.is_some_and(|e| e >= self.settings.reset_timeout) {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(tier = %self.tier, "circuit breaker half-open, admitting probe");
                    Ok(())
                } else {
                    debug!(tier = %self.tier, "circuit breaker open, rejecting call");
                    Err(VelaError::BreakerOpen { tier: self.tier })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(VelaError::BreakerOpen { tier: self.tier })
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.opened_at = None;
                inner.probe_in_flight = false;
                info!(tier = %self.tier, "circuit breaker closed");
            }
            // A call admitted before the breaker opened; the open stands.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.settings.fail_max {
                    self.open(&mut inner);
                } else {
                    debug!(
                        tier = %self.tier,
                        failure_count = inner.failure_count,
                        "circuit breaker failure recorded"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count += 1;
                self.open(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    /// Open immediately, regardless of the failure count.
    pub fn trip(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Open {
            inner.failure_count = inner.failure_count.max(self.settings.fail_max);
            self.open(&mut inner);
        }
    }

    /// Return an admitted half-open probe that never reached the backend.
    pub fn release(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    fn open(&self, inner: &mut Inner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.probe_in_flight = false;
        warn!(
            tier = %self.tier,
            failure_count = inner.failure_count,
            reset_timeout_secs = self.settings.reset_timeout.as_secs(),
            "circuit breaker opened"
        );
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            tier: self.tier,
            state: inner.state,
            failure_count: inner.failure_count,
            opened_at: inner.opened_at,
        }
    }
}

/// One breaker per tier, shared by every concurrent dispatch.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: [CircuitBreaker; 3],
}

impl CircuitBreakerRegistry {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            breakers: Tier::ALL.map(|tier| CircuitBreaker::new(tier, settings)),
        }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(BreakerSettings::from_config(config))
    }

    pub fn get(&self, tier: Tier) -> &CircuitBreaker {
        &self.breakers[tier.index()]
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.iter().map(CircuitBreaker::snapshot).collect()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerSettings::default())
    }
}
