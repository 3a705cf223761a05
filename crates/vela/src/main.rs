// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Vela - routes each query to the cheapest tier that can answer it.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod app;
mod ask;
mod budget;
mod shell;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Vela - cost-aware query routing across local, remote, and agent tiers.
#[derive(Parser, Debug)]
#[command(name = "vela", version, about, long_about = None)]
struct Cli {
    /// Configuration file to use instead of the default search paths.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Route one query and stream the answer.
    Ask {
        query: String,
        /// System prompt for this call.
        #[arg(long)]
        system: Option<String>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        max_tokens: Option<u32>,
        /// Skip the agent tier when it cannot start within this many ms.
        #[arg(long, value_name = "MS")]
        latency_budget_ms: Option<u64>,
        /// Print the usage record as JSON instead of streaming text.
        #[arg(long)]
        json: bool,
    },
    /// Show where a query would be routed without calling any backend.
    Classify {
        query: String,
        #[arg(long)]
        json: bool,
    },
    /// Inspect or change spend limits.
    Budget {
        #[command(subcommand)]
        action: BudgetCommands,
    },
    /// Probe each tier's backend.
    Status {
        #[arg(long)]
        json: bool,
        #[arg(long)]
        plain: bool,
    },
    /// Launch an interactive REPL session.
    Shell,
}

#[derive(Subcommand, Debug)]
enum BudgetCommands {
    /// Today's and this month's spend against the limits.
    Status {
        #[arg(long)]
        json: bool,
        #[arg(long)]
        plain: bool,
    },
    /// Set the daily and monthly limits in USD.
    Set {
        #[arg(long)]
        daily: f64,
        #[arg(long)]
        monthly: f64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => vela_config::load_and_validate_path(path),
        None => vela_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            vela_config::render_errors(&errors);
            std::process::exit(1);
        }
    };
    app::init_tracing(&config.agent.log_level);

    let result = match cli.command {
        Some(Commands::Ask {
            query,
            system,
            temperature,
            max_tokens,
            latency_budget_ms,
            json,
        }) => {
            let options = ask::AskOptions {
                system,
                temperature,
                max_tokens,
                latency_budget_ms,
                json,
            };
            ask::run_ask(&config, &query, options).await
        }
        Some(Commands::Classify { query, json }) => ask::run_classify(&config, &query, json).await,
        Some(Commands::Budget { action }) => match action {
            BudgetCommands::Status { json, plain } => budget::run_status(&config, json, plain).await,
            BudgetCommands::Set { daily, monthly } => {
                let path = cli
                    .config
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("vela.toml"));
                budget::run_set(&config, &path, daily, monthly).await
            }
        },
        Some(Commands::Status { json, plain }) => status::run_status(&config, json, plain).await,
        Some(Commands::Shell) => shell::run_shell(config).await,
        None => {
            println!("vela: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn binary_loads_config_defaults() {
        let config = vela_config::load_and_validate_str("").expect("default config should be valid");
        assert_eq!(config.agent.name, "vela");
    }

    #[test]
    fn cli_parses_budget_set() {
        let cli = Cli::try_parse_from([
            "vela", "--config", "/tmp/v.toml", "budget", "set", "--daily", "2", "--monthly", "30",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/v.toml")));
        match cli.command {
            Some(Commands::Budget {
                action: BudgetCommands::Set { daily, monthly },
            }) => {
                assert_eq!(daily, 2.0);
                assert_eq!(monthly, 30.0);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_parses_ask_options() {
        let cli = Cli::try_parse_from([
            "vela",
            "ask",
            "what time is it",
            "--latency-budget-ms",
            "500",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Ask {
                query,
                latency_budget_ms,
                json,
                ..
            }) => {
                assert_eq!(query, "what time is it");
                assert_eq!(latency_budget_ms, Some(500));
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
