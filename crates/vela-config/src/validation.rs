// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks semantic constraints serde cannot express: value ranges,
//! threshold ordering, retry bounds, and that every reflex pattern compiles.

use crate::diagnostic::ConfigError;
use crate::model::{TierPricing, VelaConfig};

/// Validate a deserialized configuration.
///
/// Collects every failure instead of stopping at the first one.
pub fn validate_config(config: &VelaConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.storage.database_path.trim().is_empty() {
        errors.push(invalid("storage.database_path must not be empty"));
    }

    validate_cost(config, &mut errors);
    validate_classifier(config, &mut errors);
    validate_resilience(config, &mut errors);

    if config.heavy_agent.command.trim().is_empty() {
        errors.push(invalid("heavy_agent.command must not be empty"));
    }
    for (key, url) in [
        ("fast_local.base_url", &config.fast_local.base_url),
        ("mid_remote.base_url", &config.mid_remote.base_url),
    ] {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(invalid(format!("{key} must be an http(s) URL, got `{url}`")));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

fn check_unit(key: &str, value: f64, errors: &mut Vec<ConfigError>) {
    if !(0.0..=1.0).contains(&value) {
        errors.push(invalid(format!("{key} must be within [0, 1], got {value}")));
    }
}

fn check_non_negative(key: &str, value: f64, errors: &mut Vec<ConfigError>) {
    if value.is_nan() || value < 0.0 {
        errors.push(invalid(format!("{key} must be non-negative, got {value}")));
    }
}

fn validate_cost(config: &VelaConfig, errors: &mut Vec<ConfigError>) {
    let cost = &config.cost;
    check_non_negative("cost.daily_limit_usd", cost.daily_limit_usd, errors);
    check_non_negative("cost.monthly_limit_usd", cost.monthly_limit_usd, errors);
    check_unit("cost.soft_limit_fraction", cost.soft_limit_fraction, errors);
    check_unit(
        "cost.thrifty_confidence_floor",
        cost.thrifty_confidence_floor,
        errors,
    );

    let tiers: [(&str, &TierPricing); 3] = [
        ("fast_local", &cost.pricing.fast_local),
        ("mid_remote", &cost.pricing.mid_remote),
        ("heavy_agent", &cost.pricing.heavy_agent),
    ];
    for (tier, p) in tiers {
        for (field, value) in [
            ("input_per_mtok", p.input_per_mtok),
            ("output_per_mtok", p.output_per_mtok),
            ("cache_read_per_mtok", p.cache_read_per_mtok),
            ("cache_write_per_mtok", p.cache_write_per_mtok),
        ] {
            check_non_negative(&format!("cost.pricing.{tier}.{field}"), value, errors);
        }
    }
}

fn validate_classifier(config: &VelaConfig, errors: &mut Vec<ConfigError>) {
    let c = &config.classifier;
    check_unit("classifier.fast_local_threshold", c.fast_local_threshold, errors);
    check_unit("classifier.mid_remote_threshold", c.mid_remote_threshold, errors);
    check_unit("classifier.heavy_agent_threshold", c.heavy_agent_threshold, errors);

    if c.fast_local_threshold > c.mid_remote_threshold
        || c.mid_remote_threshold > c.heavy_agent_threshold
    {
        errors.push(invalid(format!(
            "classifier thresholds must satisfy fast_local <= mid_remote <= heavy_agent, got {} / {} / {}",
            c.fast_local_threshold, c.mid_remote_threshold, c.heavy_agent_threshold
        )));
    }

    if c.short_query_max_tokens >= c.long_query_min_tokens {
        errors.push(invalid(format!(
            "classifier.short_query_max_tokens ({}) must be below long_query_min_tokens ({})",
            c.short_query_max_tokens, c.long_query_min_tokens
        )));
    }

    for (key, patterns) in [
        ("classifier.safety_patterns", &c.safety_patterns),
        ("classifier.local_command_patterns", &c.local_command_patterns),
        ("classifier.complex_task_patterns", &c.complex_task_patterns),
    ] {
        for pattern in patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                errors.push(ConfigError::InvalidPattern {
                    key: key.to_string(),
                    pattern: pattern.clone(),
                    detail: e.to_string(),
                });
            }
        }
    }

    if c.semantic.enabled && c.semantic.embedding_model.trim().is_empty() {
        errors.push(invalid(
            "classifier.semantic.embedding_model must not be empty when the semantic stage is enabled",
        ));
    }
}

fn validate_resilience(config: &VelaConfig, errors: &mut Vec<ConfigError>) {
    let r = &config.resilience;
    if r.fail_max < 1 {
        errors.push(invalid("resilience.fail_max must be at least 1"));
    }
    if r.retry_max_attempts < 1 {
        errors.push(invalid("resilience.retry_max_attempts must be at least 1"));
    }
    if r.retry_base_delay_ms > r.retry_max_delay_ms {
        errors.push(invalid(format!(
            "resilience.retry_base_delay_ms ({}) must not exceed retry_max_delay_ms ({})",
            r.retry_base_delay_ms, r.retry_max_delay_ms
        )));
    }
}
