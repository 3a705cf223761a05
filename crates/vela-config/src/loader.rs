// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./vela.toml` > `~/.config/vela/vela.toml` > `/etc/vela/vela.toml`
//! with environment variable overrides via the `VELA_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::VelaConfig;

/// Top-level sections addressable from `VELA_<SECTION>_<KEY>` variables.
const ENV_SECTIONS: &[&str] = &[
    "agent",
    "storage",
    "cost",
    "classifier",
    "resilience",
    "fast_local",
    "mid_remote",
    "heavy_agent",
];

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/vela/vela.toml` (system-wide)
/// 3. `~/.config/vela/vela.toml` (user XDG config)
/// 4. `./vela.toml` (local directory)
/// 5. `VELA_*` environment variables
pub fn load_config() -> Result<VelaConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<VelaConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(VelaConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<VelaConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(VelaConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the layered Figment before extraction.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(VelaConfig::default()))
        .merge(Toml::file("/etc/vela/vela.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("vela/vela.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("vela.toml"))
        .merge(env_provider())
}

/// Maps `VELA_MID_REMOTE_API_KEY` to `mid_remote.api_key`.
///
/// Splitting on `_` would be ambiguous because section and key names
/// contain underscores, so the section is matched as a known prefix.
fn env_provider() -> Env {
    Env::prefixed("VELA_").map(|key| map_env_key(key.as_str()).into())
}

pub(crate) fn map_env_key(key: &str) -> String {
    let key = key.to_ascii_lowercase();
    for section in ENV_SECTIONS {
        if let Some(rest) = key.strip_prefix(section).and_then(|r| r.strip_prefix('_')) {
            return format!("{section}.{rest}");
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_map_to_sections() {
        assert_eq!(map_env_key("mid_remote_api_key"), "mid_remote.api_key");
        assert_eq!(map_env_key("heavy_agent_command"), "heavy_agent.command");
        assert_eq!(map_env_key("agent_log_level"), "agent.log_level");
        assert_eq!(map_env_key("cost_daily_limit_usd"), "cost.daily_limit_usd");
        assert_eq!(map_env_key("unrelated"), "unrelated");
    }
}
