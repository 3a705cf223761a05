// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `vela shell` command implementation.
//!
//! Interactive REPL with a colored prompt, streaming output, and readline
//! history. Each line is routed on its own; the tier that answers is shown
//! before the text. Ctrl+C while an answer streams cancels that answer
//! only; Ctrl+C at the prompt leaves the shell.

use std::io::Write;
use std::time::Duration;

use colored::{ColoredString, Colorize};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use vela_agent::{DispatchEvent, DispatchRequest, Dispatcher, drain};
use vela_config::VelaConfig;
use vela_core::{Tier, VelaError};

use crate::app;
use crate::ask::{describe_error, format_decision, format_record};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A parsed input line.
#[derive(Debug, PartialEq)]
enum ShellCommand<'a> {
    Quit,
    Empty,
    Budget,
    SetBudget { daily: f64, monthly: f64 },
    Classify(&'a str),
    Status,
    Help,
    Unknown(&'a str),
    Query(&'a str),
}

fn parse_command(line: &str) -> ShellCommand<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ShellCommand::Empty;
    }
    let Some(rest) = trimmed.strip_prefix('/') else {
        return ShellCommand::Query(trimmed);
    };
    let (name, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let args = args.trim();
    match name {
        "quit" | "exit" => ShellCommand::Quit,
        "status" => ShellCommand::Status,
        "help" => ShellCommand::Help,
        "classify" if !args.is_empty() => ShellCommand::Classify(args),
        "budget" if args.is_empty() => ShellCommand::Budget,
        "budget" => {
            let mut parts = args.split_whitespace().map(str::parse::<f64>);
            match (parts.next(), parts.next(), parts.next()) {
                (Some(Ok(daily)), Some(Ok(monthly)), None) => {
                    ShellCommand::SetBudget { daily, monthly }
                }
                _ => ShellCommand::Unknown(trimmed),
            }
        }
        _ => ShellCommand::Unknown(trimmed),
    }
}

fn tier_tag(tier: Tier) -> ColoredString {
    let tag = format!("[{tier}]");
    match tier {
        Tier::FastLocal => tag.green(),
        Tier::MidRemote => tag.blue(),
        Tier::HeavyAgent => tag.magenta(),
    }
}

/// Runs the `vela shell` interactive REPL.
pub async fn run_shell(config: VelaConfig) -> Result<(), VelaError> {
    let dispatcher = app::build_dispatcher(&config).await?;

    let mut rl = DefaultEditor::new()
        .map_err(|e| VelaError::Internal(format!("failed to initialize readline: {e}")))?;

    println!("{}", "vela shell".bold().green());
    println!("Type {} for commands, {} to exit.\n", "/help".yellow(), "/quit".yellow());

    let prompt = format!("{}> ", "vela".green());
    let mut session_cost = 0.0;
    loop {
        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {e}", "error".red());
                break;
            }
        };

        let command = parse_command(&line);
        if !matches!(command, ShellCommand::Empty) {
            let _ = rl.add_history_entry(line.trim());
        }

        match command {
            ShellCommand::Quit => break,
            ShellCommand::Empty => {}
            ShellCommand::Help => print_help(),
            ShellCommand::Budget => match dispatcher.budget_status().await {
                Ok(s) => println!(
                    "today ${:.4} of ${:.2}, month ${:.4} of ${:.2}{}",
                    s.daily_spend,
                    s.daily_limit,
                    s.monthly_spend,
                    s.monthly_limit,
                    if !s.can_use_paid_tier {
                        " (limit reached)"
                    } else if s.thrifty_mode {
                        " (thrifty)"
                    } else {
                        ""
                    }
                ),
                Err(e) => eprintln!("{}: {e}", "error".red()),
            },
            ShellCommand::SetBudget { daily, monthly } => {
                match dispatcher.configure_budget(daily, monthly) {
                    Ok(()) => println!(
                        "limits set to ${daily:.2}/day, ${monthly:.2}/month for this session"
                    ),
                    Err(e) => eprintln!("{}: {e}", "error".red()),
                }
            }
            ShellCommand::Classify(query) => {
                println!("{}", format_decision(&dispatcher.classify(query).await));
            }
            ShellCommand::Status => {
                for snapshot in dispatcher.breaker_snapshots() {
                    println!(
                        "{} breaker {} ({} failures)",
                        tier_tag(snapshot.tier),
                        snapshot.state,
                        snapshot.failure_count
                    );
                }
            }
            ShellCommand::Unknown(input) => {
                eprintln!("unknown command {}, try {}", input.yellow(), "/help".yellow());
            }
            ShellCommand::Query(query) => match stream_answer(&dispatcher, query).await {
                Ok(cost) => session_cost += cost,
                Err(e) => eprintln!("{}", describe_error(&e).yellow()),
            },
        }
    }

    drain(&dispatcher, DRAIN_TIMEOUT).await;
    if session_cost > 0.0 {
        println!("{}", format!("session cost: ${session_cost:.4}").dimmed());
    }
    Ok(())
}

/// Streams one answer to stdout. Returns the cost charged for it.
async fn stream_answer(dispatcher: &Dispatcher, query: &str) -> Result<f64, VelaError> {
    let mut stream = dispatcher.route_and_stream(DispatchRequest::new(query)).await?;
    let mut stdout = std::io::stdout();
    let mut interrupted = false;

    loop {
        let event = tokio::select! {
            event = stream.next_event() => event,
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                stream.cancel();
                continue;
            }
        };
        match event {
            Some(Ok(DispatchEvent::Started { tier, .. })) => {
                print!("{} ", tier_tag(tier));
                let _ = stdout.flush();
            }
            Some(Ok(DispatchEvent::Fragment(text))) => {
                print!("{text}");
                let _ = stdout.flush();
            }
            Some(Ok(DispatchEvent::Completed(record))) => {
                println!();
                println!("{}", format_record(&record).dimmed());
                return Ok(record.cost_usd);
            }
            Some(Err(e)) => {
                println!();
                return Err(e);
            }
            None => {
                println!();
                return Ok(0.0);
            }
        }
    }
}

fn print_help() {
    println!("  {:<22} route and answer", "<text>");
    println!("  {:<22} show where <text> would go", "/classify <text>");
    println!("  {:<22} spend against limits", "/budget");
    println!("  {:<22} change limits for this session", "/budget <daily> <monthly>");
    println!("  {:<22} breaker state per tier", "/status");
    println!("  {:<22} leave", "/quit");
}
