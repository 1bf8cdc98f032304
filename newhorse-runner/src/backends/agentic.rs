// ABOUTME: Agentic runner - spawns the claude CLI with --print --output-format stream-json.
// ABOUTME: Parses streaming JSONL from stdout into RunnerEvents; resumes sessions by token.

use crate::error::RunnerError;
use crate::event::{ErrorCode, RunnerEvent, Usage};
use crate::traits::{RawEventStream, RunRequest, Runner};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command as ProcessCommand;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const STDERR_TAIL_LINES: usize = 20;

/// Configuration for the agentic runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgenticConfig {
    /// Path to the claude binary
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Tools the agent may use without asking
    #[serde(default = "default_allowed_tools")]
    pub allowed_tools: Vec<String>,
    /// Extra directories the agent may read (e.g. skills)
    #[serde(default)]
    pub add_dirs: Vec<PathBuf>,
    /// Upper bound for one agent run, including retries
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_binary() -> String {
    "claude".to_string()
}

fn default_allowed_tools() -> Vec<String> {
    ["Read", "Write", "Edit", "Bash", "Glob", "Grep"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_timeout_secs() -> u64 {
    1800 // 30 minutes
}

impl Default for AgenticConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            allowed_tools: default_allowed_tools(),
            add_dirs: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

pub struct AgenticRunner {
    config: AgenticConfig,
}

impl AgenticRunner {
    pub fn new(config: AgenticConfig) -> Self {
        Self { config }
    }
}

impl Runner for AgenticRunner {
    fn name(&self) -> &'static str {
        "agentic"
    }

    fn stream(&self, request: RunRequest) -> RawEventStream {
        let (tx, rx) = mpsc::channel::<Result<RunnerEvent>>(256);
        let config = self.config.clone();

        tokio::spawn(async move {
            let limit = Duration::from_secs(config.timeout_secs);
            let outcome = tokio::select! {
                // Receiver dropped (cancelled or connection lost): abandon the run.
                // Dropping the run future kills the child process.
                _ = tx.closed() => {
                    tracing::debug!("Agent event receiver closed, abandoning run");
                    return;
                }
                result = tokio::time::timeout(limit, run_with_resume(&config, &request, &tx)) => result,
            };

            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(_) => Some(RunnerError::RunTimeout(config.timeout_secs).into()),
            };
            if let Some(e) = failure {
                let _ = tx.send(Err(e)).await;
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

/// Result of one CLI invocation
struct Attempt {
    /// Whether any text or tool event was forwarded
    produced_output: bool,
    /// Terminal event held back so a stale resume can be retried
    terminal: Option<RunnerEvent>,
}

async fn run_with_resume(
    config: &AgenticConfig,
    request: &RunRequest,
    tx: &mpsc::Sender<Result<RunnerEvent>>,
) -> Result<()> {
    let resume = request.session_token.as_deref();
    let mut attempt = run_once(config, request, resume, tx).await?;

    // A resumed session that produced nothing usually means the CLI no longer
    // knows the session. Retry once from scratch.
    if resume.is_some() && !attempt.produced_output {
        tracing::info!(
            session = ?resume,
            "Stale agent session detected, retrying with a fresh session"
        );
        attempt = run_once(config, request, None, tx).await?;
    }

    if let Some(terminal) = attempt.terminal {
        let _ = tx.send(Ok(terminal)).await;
    }
    Ok(())
}

fn build_args(config: &AgenticConfig, request: &RunRequest, resume: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "--print".to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
        "--dangerously-skip-permissions".to_string(),
        "--model".to_string(),
        request.target.model_id.clone(),
    ];

    if let Some(session) = resume {
        args.push("--resume".to_string());
        args.push(session.to_string());
    }

    if let Some(ref prompt) = request.system_prompt {
        args.push("--append-system-prompt".to_string());
        args.push(prompt.clone());
    }

    if !config.allowed_tools.is_empty() {
        args.push("--allowedTools".to_string());
        args.push(config.allowed_tools.join(","));
    }

    for dir in config.add_dirs.iter().filter(|d| d.exists()) {
        args.push("--add-dir".to_string());
        args.push(dir.display().to_string());
    }

    args
}

async fn run_once(
    config: &AgenticConfig,
    request: &RunRequest,
    resume: Option<&str>,
    tx: &mpsc::Sender<Result<RunnerEvent>>,
) -> Result<Attempt> {
    let args = build_args(config, request, resume);
    tracing::debug!(?args, model = %request.target.model_id, "Spawning agent CLI");

    let mut command = ProcessCommand::new(&config.binary);
    command
        .args(&args)
        .env("ANTHROPIC_API_KEY", &request.target.api_key)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    if let Some(ref base_url) = request.target.base_url {
        command.env("ANTHROPIC_BASE_URL", base_url);
    }

    if let Some(ref dir) = request.working_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create working directory: {}", dir.display()))?;
        command.current_dir(dir);
    }

    let mut child = command.spawn().context("Failed to spawn agent CLI")?;

    // Prompt goes over stdin so it can never be mistaken for a flag value
    let mut stdin = child.stdin.take().context("Failed to capture stdin")?;
    stdin
        .write_all(request.instruction.as_bytes())
        .await
        .context("Failed to write prompt to agent CLI")?;
    drop(stdin);

    let stdout = child.stdout.take().context("Failed to capture stdout")?;
    let stderr = child.stderr.take().context("Failed to capture stderr")?;

    // Keep the tail of stderr for error reporting - joined below so the task never leaks
    let stderr_handle = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut tail: Vec<String> = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.is_empty() {
                continue;
            }
            tracing::warn!(stderr = %line, "Agent CLI stderr");
            if tail.len() == STDERR_TAIL_LINES {
                tail.remove(0);
            }
            tail.push(line);
        }
        tail.join("\n")
    });

    let started = Instant::now();
    let mut state = CliState::new(started);
    let mut attempt = Attempt {
        produced_output: false,
        terminal: None,
    };

    let mut lines = BufReader::new(stdout).lines();
    'read: while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read agent CLI output")?
    {
        if line.is_empty() {
            continue;
        }

        let Ok(json) = serde_json::from_str::<Value>(&line) else {
            tracing::debug!(line = %line, "Skipping non-JSON agent output");
            continue;
        };

        for event in parse_cli_event(&json, &mut state) {
            if event.is_terminal() {
                attempt.terminal = Some(event);
                break 'read;
            }
            attempt.produced_output = true;
            if tx.send(Ok(event)).await.is_err() {
                tracing::debug!("Event receiver closed, stopping stream");
                break 'read;
            }
        }
    }

    let status = child.wait().await.context("Failed to wait for agent CLI")?;
    let stderr_tail = match stderr_handle.await {
        Ok(tail) => tail,
        Err(e) => {
            tracing::warn!(error = %e, "stderr reader task failed to complete");
            String::new()
        }
    };

    if attempt.terminal.is_none() && !status.success() {
        let detail = if stderr_tail.is_empty() {
            format!("Agent CLI exited with status: {:?}", status.code())
        } else {
            format!(
                "Agent CLI exited with status {:?}: {}",
                status.code(),
                stderr_tail
            )
        };
        attempt.terminal = Some(RunnerEvent::error(ErrorCode::classify(&detail), detail));
    }

    Ok(attempt)
}

/// Parser state carried across stream-json lines
pub struct CliState {
    started: Instant,
    session_id: Option<String>,
}

impl CliState {
    pub fn new(started: Instant) -> Self {
        Self {
            started,
            session_id: None,
        }
    }

    /// Session id announced by the CLI's init event, if seen
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

/// Translate one stream-json line into zero or more events
pub fn parse_cli_event(json: &Value, state: &mut CliState) -> Vec<RunnerEvent> {
    let Some(event_type) = json.get("type").and_then(|t| t.as_str()) else {
        return Vec::new();
    };

    match event_type {
        "system" => {
            // Capture session_id from init event
            if json.get("subtype").and_then(|s| s.as_str()) == Some("init") {
                if let Some(session_id) = json.get("session_id").and_then(|s| s.as_str()) {
                    tracing::debug!(session_id = %session_id, "Agent session initialized");
                    state.session_id = Some(session_id.to_string());
                }
            }
            Vec::new()
        }
        "assistant" => {
            let mut events = Vec::new();
            let content = json
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_array());

            for item in content.into_iter().flatten() {
                match item.get("type").and_then(|t| t.as_str()) {
                    Some("tool_use") => {
                        let name = item
                            .get("name")
                            .and_then(|n| n.as_str())
                            .unwrap_or("unknown")
                            .to_string();
                        let input = item.get("input").cloned().unwrap_or(Value::Null);

                        tracing::info!(tool = %name, "Tool use detected");
                        events.push(RunnerEvent::ToolUse { name, input });
                    }
                    Some("text") => {
                        if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                            if !text.is_empty() {
                                events.push(RunnerEvent::TextDelta(text.to_string()));
                            }
                        }
                    }
                    _ => {}
                }
            }
            events
        }
        "result" => {
            let is_error = json
                .get("is_error")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

            if is_error {
                let message = json
                    .get("error")
                    .or_else(|| json.get("result"))
                    .and_then(|e| e.as_str())
                    .unwrap_or("Unknown agent error")
                    .to_string();
                return vec![RunnerEvent::error(ErrorCode::classify(&message), message)];
            }

            let duration_ms = json
                .get("duration_ms")
                .and_then(|v| v.as_u64())
                .unwrap_or_else(|| state.started.elapsed().as_millis() as u64);

            let session_token = json
                .get("session_id")
                .and_then(|s| s.as_str())
                .map(str::to_string)
                .or_else(|| state.session_id.clone());

            vec![RunnerEvent::SessionComplete {
                duration_ms,
                usage: extract_usage(json),
                session_token,
            }]
        }
        _ => Vec::new(),
    }
}

fn extract_usage(json: &Value) -> Option<Usage> {
    let mut usage = Usage::default();
    let mut found_usage = false;

    if let Some(cost) = json.get("total_cost_usd").and_then(|v| v.as_f64()) {
        usage.cost_usd = Some(cost);
        found_usage = true;
    }

    if let Some(turns) = json.get("num_turns").and_then(|v| v.as_u64()) {
        usage.num_turns = Some(turns);
        found_usage = true;
    }

    if let Some(usage_obj) = json.get("usage") {
        usage.input_tokens = usage_obj
            .get("input_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        usage.output_tokens = usage_obj
            .get("output_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        found_usage = true;
    }

    if found_usage {
        Some(usage)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{Protocol, ResolvedTarget};
    use serde_json::json;

    fn request(session_token: Option<&str>) -> RunRequest {
        RunRequest {
            instruction: "hello".to_string(),
            target: ResolvedTarget {
                provider_id: "p1".to_string(),
                provider_name: "Anthropic".to_string(),
                protocol: Protocol::Anthropic,
                model_id: "claude-sonnet-4-5-20250929".to_string(),
                api_key: "sk-ant-test".to_string(),
                base_url: None,
            },
            working_dir: None,
            system_prompt: Some("Be brief".to_string()),
            history: Vec::new(),
            session_token: session_token.map(str::to_string),
        }
    }

    #[test]
    fn test_args_include_model_and_resume() {
        let config = AgenticConfig::default();
        let args = build_args(&config, &request(Some("sess-1")), Some("sess-1"));
        let joined = args.join(" ");
        assert!(joined.contains("--model claude-sonnet-4-5-20250929"));
        assert!(joined.contains("--resume sess-1"));
        assert!(joined.contains("--append-system-prompt Be brief"));
        assert!(joined.contains("--allowedTools Read,Write,Edit,Bash,Glob,Grep"));
    }

    #[test]
    fn test_args_without_resume() {
        let config = AgenticConfig::default();
        let args = build_args(&config, &request(None), None);
        assert!(!args.contains(&"--resume".to_string()));
    }

    #[test]
    fn test_args_never_contain_credential() {
        let config = AgenticConfig::default();
        let args = build_args(&config, &request(None), None);
        assert!(!args.iter().any(|a| a.contains("sk-ant-test")));
    }

    #[test]
    fn test_result_uses_init_session_when_missing() {
        let mut state = CliState::new(Instant::now());
        parse_cli_event(
            &json!({"type": "system", "subtype": "init", "session_id": "abc"}),
            &mut state,
        );
        assert_eq!(state.session_id(), Some("abc"));

        let events = parse_cli_event(
            &json!({"type": "result", "is_error": false, "duration_ms": 1200}),
            &mut state,
        );
        assert_eq!(
            events,
            vec![RunnerEvent::SessionComplete {
                duration_ms: 1200,
                usage: None,
                session_token: Some("abc".to_string()),
            }]
        );
    }
}
