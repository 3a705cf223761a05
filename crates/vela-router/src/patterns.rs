// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Compiled reflex pattern groups.
//!
//! Each group is a [`RegexSet`] over normalized text, so matching a query
//! against every pattern of a group is a single pass.

use regex::RegexSet;
use vela_config::model::ClassifierConfig;
use vela_core::VelaError;

/// The three reflex groups, in cascade order.
#[derive(Debug, Clone)]
pub struct ReflexPatterns {
    pub safety: RegexSet,
    pub local_command: RegexSet,
    pub complex_task: RegexSet,
}

impl ReflexPatterns {
    pub fn from_config(config: &ClassifierConfig) -> Result<Self, VelaError> {
        Ok(Self {
            safety: compile("safety_patterns", &config.safety_patterns)?,
            local_command: compile("local_command_patterns", &config.local_command_patterns)?,
            complex_task: compile("complex_task_patterns", &config.complex_task_patterns)?,
        })
    }
}

fn compile(key: &str, patterns: &[String]) -> Result<RegexSet, VelaError> {
    RegexSet::new(patterns)
        .map_err(|e| VelaError::Config(format!("classifier.{key}: {e}")))
}

/// Lowercases, trims, and collapses runs of whitespace to a single space.
pub fn normalize(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize("  Set A\tTimer \n NOW "), "set a timer now");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn default_patterns_compile() {
        let patterns = ReflexPatterns::from_config(&ClassifierConfig::default()).unwrap();
        assert!(patterns.safety.is_match("i think i am having a heart attack"));
        assert!(patterns.local_command.is_match("set a timer for 5 minutes"));
        assert!(patterns.complex_task.is_match("plan my workout for the week"));
        assert!(!patterns.safety.is_match("what a lovely day"));
    }

    #[test]
    fn invalid_pattern_names_the_group() {
        let config = ClassifierConfig {
            complex_task_patterns: vec!["(unclosed".into()],
            ..ClassifierConfig::default()
        };
        let err = ReflexPatterns::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("complex_task_patterns"));
    }
}
