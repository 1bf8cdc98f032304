// ABOUTME: Completion runner - streams OpenAI-compatible chat completions over SSE.
// ABOUTME: Emits TextDelta per token chunk and one synthesized SessionComplete with usage.

use crate::error::{extract_error_message, RunnerError};
use crate::event::{RunnerEvent, Usage};
use crate::traits::{HistoryTurn, RawEventStream, Role, RunRequest, Runner};
use anyhow::{anyhow, Context, Result};
use eventsource_stream::Eventsource;
use futures::stream::{self, StreamExt};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};

/// Default endpoint when a provider has no base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for the completion runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Maximum silence between two streamed chunks
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    60
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

pub struct CompletionRunner {
    client: reqwest::Client,
    config: CompletionConfig,
}

impl CompletionRunner {
    pub fn new(config: CompletionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, config })
    }
}

/// One entry of the chat-completions `messages` array
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Build the role-ordered message list: system prompt, working-directory
/// note, prior turns, then the new instruction.
pub fn build_messages(request: &RunRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(request.history.len() + 3);

    if let Some(ref prompt) = request.system_prompt {
        messages.push(ChatMessage {
            role: Role::System,
            content: prompt.clone(),
        });
    }
    if let Some(ref dir) = request.working_dir {
        messages.push(ChatMessage {
            role: Role::System,
            content: format!("Working directory: {}", dir.display()),
        });
    }

    messages.extend(
        request
            .history
            .iter()
            .filter(|turn| !turn.content.trim().is_empty())
            .map(|HistoryTurn { role, content }| ChatMessage {
                role: *role,
                content: content.clone(),
            }),
    );

    messages.push(ChatMessage {
        role: Role::User,
        content: request.instruction.clone(),
    });
    messages
}

/// `{base}/chat/completions`, tolerating a trailing slash on the base
pub fn chat_completions_url(base_url: Option<&str>) -> String {
    let base = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');
    format!("{}/chat/completions", base)
}

impl Runner for CompletionRunner {
    fn name(&self) -> &'static str {
        "completion"
    }

    fn stream(&self, request: RunRequest) -> RawEventStream {
        let client = self.client.clone();
        let idle = Duration::from_secs(self.config.idle_timeout_secs);
        let url = chat_completions_url(request.target.base_url.as_deref());
        let body = json!({
            "model": request.target.model_id,
            "messages": build_messages(&request),
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        let api_key = request.target.api_key.clone();

        tracing::info!(
            model = %request.target.model_id,
            provider = %request.target.provider_name,
            messages = body["messages"].as_array().map(|m| m.len()).unwrap_or(0),
            "Starting chat completion"
        );

        let started = Instant::now();
        let connect = async move {
            let send = client.post(&url).bearer_auth(api_key).json(&body).send();
            let response = match tokio::time::timeout(idle, send).await {
                Ok(sent) => sent.context("Failed to reach completion endpoint")?,
                Err(_elapsed) => {
                    tracing::error!(idle_secs = idle.as_secs(), "No response headers from completion endpoint");
                    return Err(RunnerError::IdleTimeout(idle.as_secs()).into());
                }
            };

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(anyhow::Error::from(RunnerError::Status {
                    status: status.as_u16(),
                    message: extract_error_message(&text),
                }));
            }
            Ok(response.bytes_stream())
        };

        stream::once(connect)
            .map(move |connected| match connected {
                Ok(bytes) => completion_events(bytes, idle, started),
                Err(e) => stream::once(async move { Err(e) }).boxed(),
            })
            .flatten()
            .boxed()
    }
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

struct SseState<S> {
    events: S,
    usage: Option<Usage>,
    started: Instant,
    idle_secs: u64,
    done: bool,
}

impl<S> SseState<S> {
    fn complete(&mut self) -> RunnerEvent {
        self.done = true;
        RunnerEvent::SessionComplete {
            duration_ms: self.started.elapsed().as_millis() as u64,
            usage: self.usage.take(),
            session_token: None,
        }
    }

    fn fail(&mut self, err: anyhow::Error) -> Result<RunnerEvent> {
        self.done = true;
        Err(err)
    }
}

/// Turn a raw SSE byte stream into runner events.
///
/// Each non-empty `delta.content` becomes a `TextDelta`. `[DONE]` or the end
/// of the body yields one `SessionComplete` carrying the usage reported by the
/// final chunk. A gap longer than `idle` between chunks is an error.
pub fn completion_events<S, B, E>(bytes: S, idle: Duration, started: Instant) -> RawEventStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let events = Box::pin(tokio_stream::StreamExt::timeout(bytes.eventsource(), idle));
    let state = SseState {
        events,
        usage: None,
        started,
        idle_secs: idle.as_secs(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }
        loop {
            let item = match st.events.next().await {
                None => {
                    let complete = st.complete();
                    return Some((Ok(complete), st));
                }
                Some(Err(_elapsed)) => {
                    tracing::error!(idle_secs = st.idle_secs, "Completion stream timed out");
                    let err = RunnerError::IdleTimeout(st.idle_secs).into();
                    let failed = st.fail(err);
                    return Some((failed, st));
                }
                Some(Ok(Err(e))) => {
                    let failed = st.fail(anyhow!("Completion stream protocol error: {}", e));
                    return Some((failed, st));
                }
                Some(Ok(Ok(event))) => event,
            };

            let data = item.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                let complete = st.complete();
                return Some((Ok(complete), st));
            }

            let chunk: ChunkPayload = match serde_json::from_str(data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!(error = %e, data = %data, "Failed to parse completion chunk");
                    continue;
                }
            };

            if let Some(error) = chunk.error {
                let message = extract_error_message(&json!({ "error": error }).to_string());
                let failed = st.fail(anyhow!(message));
                return Some((failed, st));
            }

            if let Some(usage) = chunk.usage {
                st.usage = Some(Usage {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                    ..Usage::default()
                });
            }

            let text: String = chunk
                .choices
                .iter()
                .filter_map(|c| c.delta.content.as_deref())
                .collect();
            if !text.is_empty() {
                return Some((Ok(RunnerEvent::TextDelta(text)), st));
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{Protocol, ResolvedTarget};
    use std::path::PathBuf;

    fn request() -> RunRequest {
        RunRequest {
            instruction: "What is Rust?".to_string(),
            target: ResolvedTarget {
                provider_id: "p2".to_string(),
                provider_name: "Deepseek".to_string(),
                protocol: Protocol::OpenAi,
                model_id: "deepseek-chat".to_string(),
                api_key: "sk-test".to_string(),
                base_url: Some("https://api.deepseek.com/".to_string()),
            },
            working_dir: Some(PathBuf::from("/data/projects/p1")),
            system_prompt: Some("You are helpful".to_string()),
            history: vec![
                HistoryTurn::user("hi"),
                HistoryTurn::assistant("hello!"),
                HistoryTurn::assistant("   "),
            ],
            session_token: None,
        }
    }

    #[test]
    fn test_messages_are_role_ordered() {
        let messages = build_messages(&request());
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(messages[1].content, "Working directory: /data/projects/p1");
        assert_eq!(messages.last().unwrap().content, "What is Rust?");
    }

    #[test]
    fn test_messages_without_prompt_or_history() {
        let mut req = request();
        req.system_prompt = None;
        req.working_dir = None;
        req.history.clear();
        let messages = build_messages(&req);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }

    #[test]
    fn test_url_joins_base() {
        assert_eq!(
            chat_completions_url(Some("https://api.deepseek.com/")),
            "https://api.deepseek.com/chat/completions"
        );
        assert_eq!(
            chat_completions_url(None),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_message_serializes_lowercase_role() {
        let msg = ChatMessage {
            role: Role::Assistant,
            content: "x".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"role": "assistant", "content": "x"})
        );
    }
}
