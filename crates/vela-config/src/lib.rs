// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration system for the Vela dispatcher.
//!
//! Provides TOML configuration parsing with strict validation (`deny_unknown_fields`),
//! XDG file hierarchy lookup, environment variable overrides, and miette
//! diagnostics with typo suggestions.
//!
//! # Usage
//!
//! ```no_run
//! use vela_config::load_and_validate;
//!
//! let config = load_and_validate().expect("config errors");
//! println!("monthly limit: ${}", config.cost.monthly_limit_usd);
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

use std::path::Path;

pub use diagnostic::{ConfigError, render_errors};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::VelaConfig;

/// Load configuration from the XDG hierarchy and validate it.
///
/// Figment errors become diagnostics with source spans; validation errors
/// are collected in full.
pub fn load_and_validate() -> Result<VelaConfig, Vec<ConfigError>> {
    finish(loader::load_config(), collect_toml_sources)
}

/// Load and validate a specific TOML file (plus env overrides).
pub fn load_and_validate_path(path: &Path) -> Result<VelaConfig, Vec<ConfigError>> {
    finish(loader::load_config_from_path(path), || {
        std::fs::read_to_string(path)
            .map(|content| vec![(path.display().to_string(), content)])
            .unwrap_or_default()
    })
}

/// Load and validate an inline TOML string.
pub fn load_and_validate_str(toml_content: &str) -> Result<VelaConfig, Vec<ConfigError>> {
    finish(loader::load_config_from_str(toml_content), || {
        vec![("<inline>".to_string(), toml_content.to_string())]
    })
}

fn finish(
    loaded: Result<VelaConfig, figment::Error>,
    sources: impl FnOnce() -> Vec<(String, String)>,
) -> Result<VelaConfig, Vec<ConfigError>> {
    match loaded {
        Ok(config) => {
            validation::validate_config(&config)?;
            tracing::debug!(
                database = %config.storage.database_path,
                daily_limit = config.cost.daily_limit_usd,
                monthly_limit = config.cost.monthly_limit_usd,
                "configuration loaded"
            );
            Ok(config)
        }
        Err(err) => Err(diagnostic::figment_to_config_errors(err, &sources())),
    }
}

/// Read the TOML files of the XDG hierarchy for span resolution.
fn collect_toml_sources() -> Vec<(String, String)> {
    let mut candidates = vec![std::path::PathBuf::from("/etc/vela/vela.toml")];
    if let Some(config_dir) = dirs::config_dir() {
        candidates.push(config_dir.join("vela/vela.toml"));
    }
    candidates.push(
        std::env::current_dir()
            .map(|d| d.join("vela.toml"))
            .unwrap_or_else(|_| "vela.toml".into()),
    );

    candidates
        .into_iter()
        .filter_map(|path| {
            std::fs::read_to_string(&path)
                .ok()
                .map(|content| (path.display().to_string(), content))
        })
        .collect()
}
