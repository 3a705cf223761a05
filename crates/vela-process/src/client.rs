// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Heavy-agent tier client: one external process per call.
//!
//! The prompt goes to the child's stdin, which is then closed. Stdout is
//! read line by line. The child is spawned with `kill_on_drop`, so
//! dropping the stream (cancellation) terminates the process.

use std::io::ErrorKind as IoErrorKind;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info, warn};
use vela_config::model::{AgentOutputFormat, HeavyAgentConfig};
use vela_core::tokens::estimate_tokens;
use vela_core::{
    AdapterType, GenerationRequest, HealthStatus, PluginAdapter, StreamTimer, Tier, TierClient,
    TierEvent, TierStream, TokenUsage, VelaError,
};

use crate::events::AgentLine;

/// Longest stdout line accepted from the agent.
const MAX_LINE_BYTES: usize = 4 << 20;

/// Stderr fragments that mean the agent cannot authenticate.
const AUTH_HINTS: &[&str] = &[
    "invalid api key",
    "authentication",
    "unauthorized",
    "not logged in",
    "please run /login",
];

fn transient(message: impl Into<String>) -> VelaError {
    VelaError::BackendTransient {
        tier: Tier::HeavyAgent,
        message: message.into(),
    }
}

fn fatal(message: impl Into<String>) -> VelaError {
    VelaError::BackendFatal {
        tier: Tier::HeavyAgent,
        message: message.into(),
    }
}

/// Classifies a failed run by its diagnostic text.
fn run_failure(detail: &str) -> VelaError {
    let lower = detail.to_lowercase();
    if AUTH_HINTS.iter().any(|h| lower.contains(h)) {
        fatal(detail.trim().to_string())
    } else {
        transient(detail.trim().to_string())
    }
}

pub struct AgentProcessClient {
    command: String,
    args: Vec<String>,
    working_dir: Option<String>,
    output_format: AgentOutputFormat,
    first_fragment_timeout: Duration,
}

impl AgentProcessClient {
    pub fn new(config: &HeavyAgentConfig) -> Self {
        info!(command = %config.command, "heavy-agent tier client initialized");
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            output_format: config.output_format,
            first_fragment_timeout: Duration::from_millis(config.first_fragment_timeout_ms),
        }
    }

    fn spawn(&self) -> Result<Child, VelaError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.spawn().map_err(|e| match e.kind() {
            IoErrorKind::NotFound | IoErrorKind::PermissionDenied => {
                fatal(format!("cannot start {}: {e}", self.command))
            }
            _ => transient(format!("failed to spawn {}: {e}", self.command)),
        })
    }
}

/// Text written to the child's stdin: the system prompt, if any, then the prompt.
fn stdin_payload(request: &GenerationRequest) -> String {
    match &request.system {
        Some(system) if !system.is_empty() => format!("{system}\n\n{}", request.prompt),
        _ => request.prompt.clone(),
    }
}

#[async_trait]
impl PluginAdapter for AgentProcessClient {
    fn name(&self) -> &str {
        "agent-process"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::TierClient
    }

    /// Runs `<command> --version`.
    async fn health_check(&self) -> Result<HealthStatus, VelaError> {
        let output = Command::new(&self.command).arg("--version").output().await;
        Ok(match output {
            Ok(out) if out.status.success() => HealthStatus::Healthy,
            Ok(out) => HealthStatus::Degraded(format!("--version exited with {}", out.status)),
            Err(e) => HealthStatus::Unhealthy(format!("cannot start {}: {e}", self.command)),
        })
    }
}

#[async_trait]
impl TierClient for AgentProcessClient {
    fn tier(&self) -> Tier {
        Tier::HeavyAgent
    }

    fn backend_id(&self) -> &str {
        &self.command
    }

    fn first_fragment_timeout(&self) -> Duration {
        self.first_fragment_timeout
    }

    async fn stream(&self, request: GenerationRequest) -> Result<TierStream, VelaError> {
        let timer = StreamTimer::start();
        let payload = stdin_payload(&request);
        let mut child = self.spawn()?;
        debug!(pid = ?child.id(), "agent process started");

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VelaError::Internal("agent stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VelaError::Internal("agent stdout not captured".into()))?;
        let stderr = child.stderr.take();

        // Written from a task so a large prompt cannot deadlock against a full stdout pipe.
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                warn!(error = %e, "failed to write prompt to agent stdin");
            }
        });

        let stderr = stderr.map(|mut err| {
            tokio::spawn(async move {
                let mut text = String::new();
                let _ = err.read_to_string(&mut text).await;
                text
            })
        });

        let state = ProcessState {
            child,
            lines: FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE_BYTES)),
            stderr,
            format: self.output_format,
            timer,
            prompt_tokens: estimate_tokens(&request.prompt),
            output: String::new(),
            saw_partial: false,
            finished: false,
        };
        Ok(Box::pin(futures::stream::unfold(state, ProcessState::next_item)))
    }
}

struct ProcessState {
    child: Child,
    lines: FramedRead<ChildStdout, LinesCodec>,
    stderr: Option<JoinHandle<String>>,
    format: AgentOutputFormat,
    timer: StreamTimer,
    prompt_tokens: u64,
    /// Text emitted so far, for usage estimation when the agent reports none.
    output: String,
    /// Partial deltas were seen, so whole assistant messages are duplicates.
    saw_partial: bool,
    finished: bool,
}

impl ProcessState {
    async fn next_item(mut self) -> Option<(Result<TierEvent, VelaError>, Self)> {
        if self.finished {
            return None;
        }
        loop {
            let item = match self.lines.next().await {
                Some(Ok(line)) => match self.apply(line) {
                    Some(item) => item,
                    None => continue,
                },
                Some(Err(e)) => {
                    self.finished = true;
                    Err(transient(format!("agent stdout read failed: {e}")))
                }
                None => {
                    self.finished = true;
                    self.on_exit().await
                }
            };
            return Some((item, self));
        }
    }

    fn fragment(&mut self, text: String) -> Option<Result<TierEvent, VelaError>> {
        if text.is_empty() {
            return None;
        }
        self.timer.mark_fragment();
        self.output.push_str(&text);
        Some(Ok(TierEvent::Fragment(text)))
    }

    fn estimated_usage(&self) -> TokenUsage {
        TokenUsage::new(self.prompt_tokens, estimate_tokens(&self.output))
    }

    fn apply(&mut self, line: String) -> Option<Result<TierEvent, VelaError>> {
        match self.format {
            AgentOutputFormat::Text => self.fragment(line + "\n"),
            AgentOutputFormat::StreamJson => {
                if line.trim().is_empty() {
                    return None;
                }
                let parsed: AgentLine = match serde_json::from_str(&line) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!(error = %e, "skipping unparseable agent line");
                        return None;
                    }
                };
                match parsed {
                    AgentLine::StreamEvent { event } => {
                        let text = event.text_delta()?.to_string();
                        self.saw_partial = true;
                        self.fragment(text)
                    }
                    AgentLine::Assistant { message } if !self.saw_partial => {
                        self.fragment(message.text())
                    }
                    AgentLine::Assistant { .. } | AgentLine::Other => None,
                    AgentLine::Result(result) => {
                        self.finished = true;
                        if result.is_error {
                            let detail = result.result.unwrap_or_else(|| "agent run failed".into());
                            return Some(Err(run_failure(&detail)));
                        }
                        let usage = result
                            .usage
                            .map(TokenUsage::from)
                            .unwrap_or_else(|| self.estimated_usage());
                        Some(Ok(TierEvent::Done(self.timer.summary(usage))))
                    }
                }
            }
        }
    }

    /// Stdout closed without a `result` line.
    async fn on_exit(&mut self) -> Result<TierEvent, VelaError> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| transient(format!("failed to wait for agent: {e}")))?;
        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            let detail = if stderr.trim().is_empty() {
                format!("agent exited with {status}")
            } else {
                stderr
            };
            return Err(run_failure(&detail));
        }
        match self.format {
            AgentOutputFormat::Text => {
                Ok(TierEvent::Done(self.timer.summary(self.estimated_usage())))
            }
            AgentOutputFormat::StreamJson => Err(transient("agent exited without a result line")),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, format: AgentOutputFormat) -> AgentProcessClient {
        AgentProcessClient::new(&HeavyAgentConfig {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            output_format: format,
            ..HeavyAgentConfig::default()
        })
    }

    async fn run(client: &AgentProcessClient, prompt: &str) -> Vec<Result<TierEvent, VelaError>> {
        match client.stream(GenerationRequest::new(prompt)).await {
            Ok(stream) => stream.collect().await,
            Err(e) => vec![Err(e)],
        }
    }

    #[tokio::test]
    async fn text_mode_echoes_stdin_and_estimates_usage() {
        let client = sh("cat", AgentOutputFormat::Text);
        let events = run(&client, "hello agent").await;
        assert_eq!(events.len(), 2);
        assert_eq!(
            *events[0].as_ref().unwrap(),
            TierEvent::Fragment("hello agent\n".into())
        );
        match events[1].as_ref().unwrap() {
            TierEvent::Done(s) => {
                assert!(s.usage.input_tokens > 0);
                assert!(s.usage.output_tokens > 0);
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_json_reports_agent_usage() {
        let script = r#"cat >/dev/null
echo '{"type":"system","subtype":"init"}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"Week 1: run."}]}}'
echo 'not json'
echo '{"type":"result","subtype":"success","is_error":false,"result":"Week 1: run.","usage":{"input_tokens":20,"output_tokens":5}}'"#;
        let events = run(&sh(script, AgentOutputFormat::StreamJson), "plan").await;
        assert_eq!(events.len(), 2);
        assert_eq!(
            *events[0].as_ref().unwrap(),
            TierEvent::Fragment("Week 1: run.".into())
        );
        match events[1].as_ref().unwrap() {
            TierEvent::Done(s) => assert_eq!(s.usage, TokenUsage::new(20, 5)),
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn partial_deltas_suppress_duplicate_assistant_text() {
        let script = r#"cat >/dev/null
echo '{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hel"}}}'
echo '{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"text_delta","text":"lo"}}}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"Hello"}]}}'
echo '{"type":"result","is_error":false}'"#;
        let events = run(&sh(script, AgentOutputFormat::StreamJson), "hi").await;
        let fragments: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Ok(TierEvent::Fragment(t)) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(fragments, vec!["Hel", "lo"]);
        assert!(matches!(events.last(), Some(Ok(TierEvent::Done(_)))));
    }

    #[tokio::test]
    async fn auth_failure_is_fatal() {
        let client = sh(
            "cat >/dev/null; echo 'Invalid API key' >&2; exit 1",
            AgentOutputFormat::StreamJson,
        );
        let events = run(&client, "hi").await;
        assert!(events[0].as_ref().unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn crash_is_transient() {
        let client = sh("cat >/dev/null; exit 3", AgentOutputFormat::StreamJson);
        let events = run(&client, "hi").await;
        let err = events[0].as_ref().unwrap_err();
        assert!(err.is_transient(), "got {err}");
    }

    #[tokio::test]
    async fn missing_command_is_fatal() {
        let client = AgentProcessClient::new(&HeavyAgentConfig {
            command: "/nonexistent/vela-agent-binary".into(),
            ..HeavyAgentConfig::default()
        });
        let err = client
            .stream(GenerationRequest::new("hi"))
            .await
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn system_prompt_precedes_prompt_on_stdin() {
        let mut request = GenerationRequest::new("question");
        request.system = Some("be brief".into());
        assert_eq!(stdin_payload(&request), "be brief\n\nquestion");
    }
}
