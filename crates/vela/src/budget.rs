// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `vela budget status` and `vela budget set` command implementations.

use std::io::IsTerminal;
use std::path::Path;

use colored::Colorize;
use serde::Serialize;
use tracing::info;
use vela_config::VelaConfig;
use vela_core::VelaError;
use vela_cost::{BudgetStatus, TierSpend};

use crate::app;

#[derive(Debug, Serialize)]
struct BudgetReport {
    status: BudgetStatus,
    tiers: Vec<TierSpend>,
}

/// Runs `vela budget status`.
pub async fn run_status(config: &VelaConfig, json: bool, plain: bool) -> Result<(), VelaError> {
    let budget = app::open_budget(config).await?;
    let report = BudgetReport {
        status: budget.status().await?,
        tiers: budget.tier_breakdown().await?,
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".to_string())
        );
    } else {
        let use_color = !plain && std::io::stdout().is_terminal();
        print_report(&report, use_color);
    }
    Ok(())
}

fn print_report(report: &BudgetReport, use_color: bool) {
    let s = &report.status;
    let mode = if !s.can_use_paid_tier {
        "monthly limit reached, fast-local only"
    } else if s.thrifty_mode {
        "thrifty"
    } else {
        "normal"
    };
    let mode = if !use_color {
        mode.normal()
    } else if !s.can_use_paid_tier {
        mode.red()
    } else if s.thrifty_mode {
        mode.yellow()
    } else {
        mode.green()
    };

    println!(
        "today:      ${:.4} of ${:.2}{}",
        s.daily_spend,
        s.daily_limit,
        if s.daily_limit_reached { " (daily limit reached)" } else { "" }
    );
    println!(
        "this month: ${:.4} of ${:.2} ({:.0}%)",
        s.monthly_spend,
        s.monthly_limit,
        s.monthly_fraction() * 100.0
    );
    println!("mode:       {mode}");

    if !report.tiers.is_empty() {
        println!();
        for t in &report.tiers {
            println!(
                "  {:<12} {:>5} calls  {:>9} in  {:>9} out  ${:.4}",
                t.tier.to_string(),
                t.records,
                t.input_tokens,
                t.output_tokens,
                t.cost_usd
            );
        }
    }
}

/// Runs `vela budget set`: writes the limits to `config_path` and shows
/// the status they produce.
pub async fn run_set(
    config: &VelaConfig,
    config_path: &Path,
    daily_limit_usd: f64,
    monthly_limit_usd: f64,
) -> Result<(), VelaError> {
    let budget = app::open_budget(config).await?;
    // Rejects negative or non-finite amounts before anything is written.
    budget.configure(daily_limit_usd, monthly_limit_usd)?;

    write_limits(config_path, daily_limit_usd, monthly_limit_usd)?;
    info!(path = %config_path.display(), "budget limits saved");

    let status = budget.status().await?;
    println!(
        "limits saved to {}: ${daily_limit_usd:.2}/day, ${monthly_limit_usd:.2}/month",
        config_path.display()
    );
    println!(
        "current spend: ${:.4} today, ${:.4} this month{}",
        status.daily_spend,
        status.monthly_spend,
        if status.can_use_paid_tier { "" } else { " (limit reached)" }
    );
    Ok(())
}

/// Set `[cost] daily_limit_usd` and `monthly_limit_usd` in a TOML file,
/// creating the file or section if needed and keeping everything else.
pub fn write_limits(
    path: &Path,
    daily_limit_usd: f64,
    monthly_limit_usd: f64,
) -> Result<(), VelaError> {
    let io_err = |e: std::io::Error| VelaError::Config(format!("{}: {e}", path.display()));

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(io_err(e)),
    };
    let mut doc: toml::Table = content
        .parse()
        .map_err(|e| VelaError::Config(format!("{}: {e}", path.display())))?;

    let cost = doc
        .entry("cost")
        .or_insert_with(|| toml::Value::Table(toml::Table::new()));
    let Some(cost) = cost.as_table_mut() else {
        return Err(VelaError::Config(format!(
            "{}: `cost` is not a table",
            path.display()
        )));
    };
    cost.insert("daily_limit_usd".into(), toml::Value::Float(daily_limit_usd));
    cost.insert("monthly_limit_usd".into(), toml::Value::Float(monthly_limit_usd));

    let rendered = toml::to_string_pretty(&doc)
        .map_err(|e| VelaError::Internal(format!("failed to render config: {e}")))?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, rendered).map_err(io_err)
}
