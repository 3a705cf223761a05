// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `vela ask` and `vela classify` command implementations.
//!
//! `ask` streams one answer to stdout as fragments arrive and prints the
//! usage trailer to stderr. Ctrl+C cancels the stream; the partial usage
//! is still recorded before the process exits.

use std::io::{IsTerminal, Write};
use std::time::Duration;

use colored::Colorize;
use futures::StreamExt;
use tracing::debug;
use vela_agent::{DispatchEvent, DispatchRequest, drain, install_signal_handler};
use vela_config::VelaConfig;
use vela_core::{ErrorKind, RoutingDecision, VelaError};
use vela_cost::UsageRecord;

use crate::app;

/// Upper bound on waiting for usage writes at exit.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-call options of `vela ask`.
#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub latency_budget_ms: Option<u64>,
    pub json: bool,
}

impl AskOptions {
    pub fn to_request(&self, query: &str) -> DispatchRequest {
        let mut request = DispatchRequest::new(query);
        if let Some(system) = &self.system {
            request = request.with_system(system.clone());
        }
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        if let Some(ms) = self.latency_budget_ms {
            request = request.with_latency_budget(Duration::from_millis(ms));
        }
        request
    }
}

/// Caller-facing wording for a terminal dispatch error.
pub fn describe_error(e: &VelaError) -> String {
    match e.kind() {
        ErrorKind::BudgetExceeded => {
            "Spend limit reached and the local model is unavailable. Try again later or raise the budget.".to_string()
        }
        ErrorKind::AllTiersUnavailable => {
            "No backend is available right now. Please try again in a minute.".to_string()
        }
        ErrorKind::BackendFatal => format!("A backend rejected the request: {e}"),
        ErrorKind::BackendTransient | ErrorKind::Timeout => {
            format!("The answer was interrupted: {e}")
        }
        _ => e.to_string(),
    }
}

/// One-line trailer: tier, tokens, cost, latency.
pub fn format_record(record: &UsageRecord) -> String {
    let first = record
        .first_fragment_ms
        .map(|ms| format!(", first {ms}ms"))
        .unwrap_or_default();
    format!(
        "[{} {} | {} in / {} out | ${:.5} | {}ms{}{}]",
        record.tier,
        record.backend_id,
        record.input_tokens,
        record.output_tokens,
        record.cost_usd,
        record.latency_ms,
        first,
        if record.outcome == vela_cost::UsageOutcome::Completed {
            String::new()
        } else {
            format!(" | {}", record.outcome)
        },
    )
}

pub fn format_decision(decision: &RoutingDecision) -> String {
    let mut line = format!(
        "{} (confidence {:.2}, {})",
        decision.tier, decision.confidence, decision.category
    );
    if let Some(reason) = decision.bypass_reason {
        line.push_str(&format!(", {reason}"));
    }
    line
}

/// Runs `vela ask`.
pub async fn run_ask(config: &VelaConfig, query: &str, options: AskOptions) -> Result<(), VelaError> {
    let dispatcher = app::build_dispatcher(config).await?;
    let shutdown = install_signal_handler();
    let use_color = std::io::stderr().is_terminal();

    let mut stream = dispatcher.route_and_stream(options.to_request(query)).await?;
    debug!(decision = %format_decision(stream.decision()), "streaming");

    let mut stdout = std::io::stdout();
    let mut outcome = Ok(None);
    loop {
        let event = tokio::select! {
            event = stream.next() => event,
            _ = shutdown.cancelled() => {
                stream.cancel();
                stream.next().await
            }
        };
        match event {
            Some(Ok(DispatchEvent::Started { .. })) => {}
            Some(Ok(DispatchEvent::Fragment(text))) => {
                if !options.json {
                    print!("{text}");
                    let _ = stdout.flush();
                }
            }
            Some(Ok(DispatchEvent::Completed(record))) => {
                outcome = Ok(Some(record));
                break;
            }
            Some(Err(e)) => {
                outcome = Err(e);
                break;
            }
            None => break,
        }
    }
    drop(stream);
    drain(&dispatcher, DRAIN_TIMEOUT).await;

    match outcome {
        Ok(Some(record)) => {
            if options.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&record).unwrap_or_else(|_| "{}".to_string())
                );
            } else {
                println!();
                let line = format_record(&record);
                if use_color {
                    eprintln!("{}", line.dimmed());
                } else {
                    eprintln!("{line}");
                }
            }
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => {
            eprintln!("{}", describe_error(&e));
            Err(e)
        }
    }
}

/// Runs `vela classify`: routing metadata without calling any backend.
pub async fn run_classify(config: &VelaConfig, query: &str, json: bool) -> Result<(), VelaError> {
    let classifier = app::build_classifier(config)?;
    let decision = classifier.classify(query).await;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&decision).unwrap_or_else(|_| "{}".to_string())
        );
    } else {
        println!("{}", format_decision(&decision));
    }
    Ok(())
}
