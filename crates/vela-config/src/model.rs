// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Vela dispatcher.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Vela configuration.
///
/// Loaded from TOML files following the XDG hierarchy, with environment
/// variable overrides. Every section is optional and defaults sensibly.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VelaConfig {
    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Budget limits and per-tier pricing.
    #[serde(default)]
    pub cost: CostConfig,

    /// Reflex patterns, length heuristics, and semantic prototypes.
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Circuit breaker and retry parameters, shared by every tier.
    #[serde(default)]
    pub resilience: ResilienceConfig,

    #[serde(default)]
    pub fast_local: FastLocalConfig,

    #[serde(default)]
    pub mid_remote: MidRemoteConfig,

    #[serde(default)]
    pub heavy_agent: HeavyAgentConfig,
}

/// Identity and logging.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// System prompt sent with every dispatched query.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            log_level: default_log_level(),
            system_prompt: None,
        }
    }
}

fn default_agent_name() -> String {
    "vela".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// SQLite storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file holding the usage ledger.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("vela").join("vela.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("vela.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// Budget limits and pricing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CostConfig {
    /// Daily spend ceiling in USD (UTC day).
    #[serde(default = "default_daily_limit")]
    pub daily_limit_usd: f64,

    /// Monthly spend ceiling in USD (UTC calendar month).
    #[serde(default = "default_monthly_limit")]
    pub monthly_limit_usd: f64,

    /// Fraction of the monthly limit above which thrifty mode engages.
    #[serde(default = "default_soft_limit_fraction")]
    pub soft_limit_fraction: f64,

    /// Mid-remote decisions below this confidence downgrade in thrifty mode.
    #[serde(default = "default_thrifty_confidence_floor")]
    pub thrifty_confidence_floor: f64,

    #[serde(default)]
    pub pricing: PricingConfig,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            daily_limit_usd: default_daily_limit(),
            monthly_limit_usd: default_monthly_limit(),
            soft_limit_fraction: default_soft_limit_fraction(),
            thrifty_confidence_floor: default_thrifty_confidence_floor(),
            pricing: PricingConfig::default(),
        }
    }
}

fn default_daily_limit() -> f64 {
    1.0
}

fn default_monthly_limit() -> f64 {
    10.0
}

fn default_soft_limit_fraction() -> f64 {
    0.8
}

fn default_thrifty_confidence_floor() -> f64 {
    0.7
}

/// Per-tier prices.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    #[serde(default)]
    pub fast_local: TierPricing,

    #[serde(default = "default_mid_remote_pricing")]
    pub mid_remote: TierPricing,

    #[serde(default)]
    pub heavy_agent: TierPricing,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            fast_local: TierPricing::default(),
            mid_remote: default_mid_remote_pricing(),
            heavy_agent: TierPricing::default(),
        }
    }
}

/// Prices in USD per million tokens. Zero for flat-rate tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TierPricing {
    #[serde(default)]
    pub input_per_mtok: f64,
    #[serde(default)]
    pub output_per_mtok: f64,
    #[serde(default)]
    pub cache_read_per_mtok: f64,
    #[serde(default)]
    pub cache_write_per_mtok: f64,
}

fn default_mid_remote_pricing() -> TierPricing {
    TierPricing {
        input_per_mtok: 1.0,
        output_per_mtok: 5.0,
        cache_read_per_mtok: 0.10,
        cache_write_per_mtok: 1.25,
    }
}

/// Classifier cascade settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClassifierConfig {
    /// Minimum similarity for a semantic fast-local match.
    #[serde(default = "default_fast_local_threshold")]
    pub fast_local_threshold: f64,

    #[serde(default = "default_mid_remote_threshold")]
    pub mid_remote_threshold: f64,

    #[serde(default = "default_heavy_agent_threshold")]
    pub heavy_agent_threshold: f64,

    /// Queries with at most this many words route to fast-local.
    #[serde(default = "default_short_query_max_tokens")]
    pub short_query_max_tokens: usize,

    /// Queries with more than this many words route to heavy-agent.
    #[serde(default = "default_long_query_min_tokens")]
    pub long_query_min_tokens: usize,

    /// Regexes over normalized lowercase text; a match forces heavy-agent.
    #[serde(default = "default_safety_patterns")]
    pub safety_patterns: Vec<String>,

    #[serde(default = "default_local_command_patterns")]
    pub local_command_patterns: Vec<String>,

    #[serde(default = "default_complex_task_patterns")]
    pub complex_task_patterns: Vec<String>,

    #[serde(default)]
    pub semantic: SemanticConfig,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            fast_local_threshold: default_fast_local_threshold(),
            mid_remote_threshold: default_mid_remote_threshold(),
            heavy_agent_threshold: default_heavy_agent_threshold(),
            short_query_max_tokens: default_short_query_max_tokens(),
            long_query_min_tokens: default_long_query_min_tokens(),
            safety_patterns: default_safety_patterns(),
            local_command_patterns: default_local_command_patterns(),
            complex_task_patterns: default_complex_task_patterns(),
            semantic: SemanticConfig::default(),
        }
    }
}

fn default_fast_local_threshold() -> f64 {
    0.70
}

fn default_mid_remote_threshold() -> f64 {
    0.75
}

fn default_heavy_agent_threshold() -> f64 {
    0.80
}

fn default_short_query_max_tokens() -> usize {
    3
}

fn default_long_query_min_tokens() -> usize {
    25
}

fn default_safety_patterns() -> Vec<String> {
    [
        r"\b(suicid\w*|kill (myself|me)|end my life|self[- ]harm|hurt (myself|someone))\b",
        r"\b(overdose|chest pain|can'?t breathe|heart attack|having a stroke|unconscious)\b",
        r"\b(emergency|911|ambulance|poison control)\b",
        r"\b(being abused|domestic violence|sexual assault)\b",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_local_command_patterns() -> Vec<String> {
    [
        r"\b(set|start|cancel|stop) (a |an |the |my )?(timer|alarm|reminder|stopwatch)\b",
        r"\b(turn|switch) (on|off) (the )?\w+",
        r"\b(increase|decrease|raise|lower|mute|unmute) (the )?volume\b",
        r"^(what time is it|what'?s the time|what'?s the date|what day is it)\b",
        r"^(pause|resume|skip|next track|previous track)\b",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_complex_task_patterns() -> Vec<String> {
    [
        r"\bplan\b.*\b(week|month|trip|workout|meals?|schedule|itinerary)\b",
        r"\b(write|draft|compose) (me )?(a |an )?(essay|report|story|article|proposal|cover letter)\b",
        r"\b(analy[sz]e|compare and contrast|step[- ]by[- ]step|debug|refactor)\b",
        r"\b(summari[sz]e|outline) (this|the|my) (document|paper|book|article|codebase)\b",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Semantic prototype stage.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SemanticConfig {
    /// Run the semantic stage when an embedding function is available.
    #[serde(default = "default_semantic_enabled")]
    pub enabled: bool,

    /// Embedding model served by the fast-local backend.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_fast_local_examples")]
    pub fast_local_examples: Vec<String>,

    #[serde(default = "default_mid_remote_examples")]
    pub mid_remote_examples: Vec<String>,

    #[serde(default = "default_heavy_agent_examples")]
    pub heavy_agent_examples: Vec<String>,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: default_semantic_enabled(),
            embedding_model: default_embedding_model(),
            fast_local_examples: default_fast_local_examples(),
            mid_remote_examples: default_mid_remote_examples(),
            heavy_agent_examples: default_heavy_agent_examples(),
        }
    }
}

fn default_semantic_enabled() -> bool {
    true
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_fast_local_examples() -> Vec<String> {
    [
        "what's the weather like today",
        "tell me a joke",
        "how do you spell necessary",
        "what's two plus two",
        "good morning",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_mid_remote_examples() -> Vec<String> {
    [
        "explain how vaccines train the immune system",
        "suggest a recipe for dinner with chicken and rice",
        "help me word a polite email to my landlord",
        "what are the pros and cons of electric cars",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_heavy_agent_examples() -> Vec<String> {
    [
        "build me a marathon training program with weekly mileage",
        "research the best laptops under a thousand dollars and compare their specs",
        "write and test a script that renames my photos by date",
        "organize next month's calendar around my project deadlines",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Circuit breaker and retry parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResilienceConfig {
    /// Consecutive failures that open a tier's breaker.
    #[serde(default = "default_fail_max")]
    pub fail_max: u32,

    /// Seconds an open breaker waits before admitting a probe.
    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: u64,

    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            fail_max: default_fail_max(),
            reset_timeout_secs: default_reset_timeout_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

fn default_fail_max() -> u32 {
    3
}

fn default_reset_timeout_secs() -> u64 {
    60
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

/// Fast-local tier (Ollama).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FastLocalConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    #[serde(default = "default_fast_local_model")]
    pub model: String,

    #[serde(default = "default_fast_local_first_fragment_ms")]
    pub first_fragment_timeout_ms: u64,
}

impl Default for FastLocalConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: default_fast_local_model(),
            first_fragment_timeout_ms: default_fast_local_first_fragment_ms(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_fast_local_model() -> String {
    "llama3.2:3b".to_string()
}

fn default_fast_local_first_fragment_ms() -> u64 {
    3_000
}

/// Mid-remote tier (Anthropic Messages API).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MidRemoteConfig {
    /// API key. `None` falls back to the `ANTHROPIC_API_KEY` environment variable.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_mid_remote_model")]
    pub model: String,

    /// Value of the `anthropic-version` header.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_anthropic_url")]
    pub base_url: String,

    /// Mark the system prompt cacheable so repeat calls bill at the cache-read rate.
    #[serde(default = "default_cache_system_prompt")]
    pub cache_system_prompt: bool,

    #[serde(default = "default_mid_remote_first_fragment_ms")]
    pub first_fragment_timeout_ms: u64,
}

impl Default for MidRemoteConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_mid_remote_model(),
            api_version: default_api_version(),
            base_url: default_anthropic_url(),
            cache_system_prompt: default_cache_system_prompt(),
            first_fragment_timeout_ms: default_mid_remote_first_fragment_ms(),
        }
    }
}

fn default_mid_remote_model() -> String {
    "claude-haiku-4-5".to_string()
}

fn default_api_version() -> String {
    "2023-06-01".to_string()
}

fn default_anthropic_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_cache_system_prompt() -> bool {
    true
}

fn default_mid_remote_first_fragment_ms() -> u64 {
    8_000
}

/// Output format emitted by the heavy-agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentOutputFormat {
    /// One JSON event per line, closed by a `result` event carrying usage.
    StreamJson,
    /// Plain text on stdout; usage is estimated.
    Text,
}

/// Heavy-agent tier (external managed process).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HeavyAgentConfig {
    /// Executable to spawn for each call. The prompt is written to stdin.
    #[serde(default = "default_agent_command")]
    pub command: String,

    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,

    /// Working directory for the spawned process.
    #[serde(default)]
    pub working_dir: Option<String>,

    #[serde(default = "default_agent_output_format")]
    pub output_format: AgentOutputFormat,

    /// Typical process startup cost; heavy routing is skipped below this latency budget.
    #[serde(default = "default_startup_overhead_ms")]
    pub startup_overhead_ms: u64,

    #[serde(default = "default_heavy_agent_first_fragment_ms")]
    pub first_fragment_timeout_ms: u64,
}

impl Default for HeavyAgentConfig {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            args: default_agent_args(),
            working_dir: None,
            output_format: default_agent_output_format(),
            startup_overhead_ms: default_startup_overhead_ms(),
            first_fragment_timeout_ms: default_heavy_agent_first_fragment_ms(),
        }
    }
}

fn default_agent_command() -> String {
    "claude".to_string()
}

fn default_agent_args() -> Vec<String> {
    ["--print", "--output-format", "stream-json", "--verbose"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_agent_output_format() -> AgentOutputFormat {
    AgentOutputFormat::StreamJson
}

fn default_startup_overhead_ms() -> u64 {
    3_000
}

fn default_heavy_agent_first_fragment_ms() -> u64 {
    30_000
}
