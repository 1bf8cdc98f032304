// ABOUTME: Execution coordinator - resolve, run, fan out, persist, cancel for one chat turn.
// ABOUTME: Enforces one in-flight request per project and a terminal state for every request.

use crate::config::Config;
use crate::error::ChatError;
use crate::resolve::{resolve, Hints};
use crate::store::{Message, MessageRole, MessageType, NewMessage, Store};
use crate::wire::{ChatRequest, OutboundMessage};
use async_trait::async_trait;
use futures::StreamExt;
use newhorse_runner::summary::tool_summary;
use newhorse_runner::{guard, HistoryTurn, ResolvedTarget, RunRequest, RunnerEvent, RunnerRegistry};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Instruction that resets the project's agent session before running
pub const CLEAR_COMMAND: &str = "/clear";

/// Lifecycle of one chat request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Idle,
    Resolving,
    Streaming,
    Completed,
    Errored,
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Errored | ExecutionState::Cancelled
        )
    }
}

/// Where outbound messages for a project go
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, message: OutboundMessage);
}

#[async_trait]
impl EventSink for tokio::sync::mpsc::Sender<OutboundMessage> {
    async fn deliver(&self, message: OutboundMessage) {
        if self.send(message).await.is_err() {
            tracing::debug!("Outbound receiver dropped");
        }
    }
}

type ActiveRuns = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Marks a project as busy until dropped
pub struct RunGuard {
    project_id: String,
    token: CancellationToken,
    active: ActiveRuns,
}

impl RunGuard {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.project_id);
    }
}

pub struct Coordinator {
    store: Store,
    runners: RunnerRegistry,
    config: Arc<Config>,
    active: ActiveRuns,
}

impl Coordinator {
    pub fn new(store: Store, runners: RunnerRegistry, config: Arc<Config>) -> Self {
        Self {
            store,
            runners,
            config,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Claim the project for a new request, or fail with `ChatError::Busy`
    pub fn try_begin(&self, project_id: &str) -> Result<RunGuard, ChatError> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.contains_key(project_id) {
            return Err(ChatError::Busy);
        }
        let token = CancellationToken::new();
        active.insert(project_id.to_string(), token.clone());
        Ok(RunGuard {
            project_id: project_id.to_string(),
            token,
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_busy(&self, project_id: &str) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.contains_key(project_id)
    }

    /// Cancel the in-flight request of a project. Returns false when idle.
    pub fn stop(&self, project_id: &str) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.get(project_id) {
            Some(token) => {
                tracing::info!(project_id = %project_id, "Stop requested");
                token.cancel();
                true
            }
            None => {
                tracing::debug!(project_id = %project_id, "Stop requested with nothing running");
                false
            }
        }
    }

    /// Serve one chat turn to its terminal state.
    ///
    /// A busy project gets a busy frame and `Err(ChatError::Busy)`; every
    /// accepted request ends in Completed, Errored, or Cancelled.
    pub async fn handle_chat(
        &self,
        project_id: &str,
        request: ChatRequest,
        sink: &dyn EventSink,
    ) -> Result<ExecutionState, ChatError> {
        match self.try_begin(project_id) {
            Ok(run) => Ok(self.handle_claimed(run, project_id, request, sink).await),
            Err(e) => {
                reject_busy(project_id, sink).await;
                Err(e)
            }
        }
    }

    /// Serve a turn for a project already claimed with `try_begin`.
    ///
    /// Callers that read frames in order claim synchronously and spawn this,
    /// so a stop read right after the turn always finds it.
    pub async fn handle_claimed(
        &self,
        run: RunGuard,
        project_id: &str,
        request: ChatRequest,
        sink: &dyn EventSink,
    ) -> ExecutionState {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("chat", project_id = %project_id, request_id = %request_id);
        let state = self
            .execute(project_id, &request_id, request, run.token(), sink)
            .instrument(span)
            .await;
        drop(run);
        state
    }

    async fn execute(
        &self,
        project_id: &str,
        request_id: &str,
        request: ChatRequest,
        cancel: CancellationToken,
        sink: &dyn EventSink,
    ) -> ExecutionState {
        let instruction = request.content.trim().to_string();
        let fresh = instruction == CLEAR_COMMAND;
        let mut state = ExecutionState::Idle;

        let project = self.store.get_project(project_id).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load project, using defaults");
            None
        });

        if fresh {
            if let Err(e) = self.store.clear_session_token(project_id) {
                tracing::warn!(error = %e, "Failed to reset agent session");
            }
        }

        // History is read before the new turn lands so it holds prior turns only
        let history = if fresh {
            Vec::new()
        } else {
            self.history(project_id)
        };

        let mut user_turn = NewMessage::new(
            project_id,
            request_id,
            MessageRole::User,
            MessageType::Chat,
            instruction.clone(),
        );

        transition(&mut state, ExecutionState::Resolving);
        let hints = Hints {
            model: request.model.as_deref(),
            provider_id: request.provider_id.as_deref(),
        };
        let target = match self
            .store
            .snapshot()
            .map_err(|e| ChatError::Persistence(e.to_string()))
            .and_then(|snapshot| resolve(&snapshot, self.store.vault(), hints, project.as_ref()))
        {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!(error = %e, "Resolution failed");
                user_turn.model_id = request.model.clone();
                self.persist(&user_turn);
                sink.deliver(rejection(project_id, request_id, &e)).await;
                transition(&mut state, ExecutionState::Errored);
                return state;
            }
        };

        // The user row carries the model that actually serves the turn
        user_turn.model_id = Some(target.model_id.clone());
        user_turn.provider_id = Some(target.provider_id.clone());
        self.persist(&user_turn);

        let runner = match self.runners.get(target.protocol) {
            Ok(runner) => runner,
            Err(e) => {
                let e = ChatError::configuration(e.to_string());
                sink.deliver(rejection(project_id, request_id, &e)).await;
                transition(&mut state, ExecutionState::Errored);
                return state;
            }
        };

        let session_token = if fresh {
            None
        } else {
            self.store.session_token(project_id).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to load agent session");
                None
            })
        };

        let run_request = RunRequest {
            instruction,
            target: target.clone(),
            working_dir: Some(
                self.config
                    .working_dir_for(project_id, project.as_ref().and_then(|p| p.repo_path.as_deref())),
            ),
            system_prompt: self.config.chat.system_prompt.clone(),
            history,
            session_token,
        };

        transition(&mut state, ExecutionState::Streaming);
        tracing::info!(
            runner = runner.name(),
            provider = %target.provider_name,
            model = %target.model_id,
            "Streaming response"
        );

        let events = guard(runner.stream(run_request), cancel, runner.name());
        tokio::pin!(events);

        while let Some(event) = events.next().await {
            if let RunnerEvent::SessionComplete {
                session_token: Some(ref token),
                ..
            } = event
            {
                if let Err(e) = self.store.save_session_token(project_id, token) {
                    tracing::warn!(error = %e, "Failed to save agent session");
                }
            }

            let message = event_message(project_id, request_id, &target, &event);
            sink.deliver(OutboundMessage::from(&message)).await;
            self.persist(&message);

            match event {
                RunnerEvent::SessionComplete { .. } => {
                    transition(&mut state, ExecutionState::Completed)
                }
                RunnerEvent::Error { .. } => transition(&mut state, ExecutionState::Errored),
                RunnerEvent::Stopped => transition(&mut state, ExecutionState::Cancelled),
                RunnerEvent::TextDelta(_) | RunnerEvent::ToolUse { .. } => continue,
            }
            break;
        }

        if !state.is_terminal() {
            tracing::error!("Runner stream ended without a terminal event");
            transition(&mut state, ExecutionState::Errored);
        }
        state
    }

    /// Prior user/assistant turns; consecutive assistant deltas are merged
    fn history(&self, project_id: &str) -> Vec<HistoryTurn> {
        let rows = match self
            .store
            .conversation_rows(project_id, self.config.chat.history_limit)
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load conversation history");
                return Vec::new();
            }
        };
        merge_history(rows)
    }

    fn persist(&self, message: &NewMessage) {
        if let Err(e) = self.store.insert_message(message) {
            tracing::warn!(
                error = %e,
                message_type = %message.message_type,
                "Failed to persist message"
            );
        }
    }
}

fn transition(state: &mut ExecutionState, next: ExecutionState) {
    tracing::debug!(from = ?state, to = ?next, "Execution state");
    *state = next;
}

/// Collapse stored rows into turns: one per user message, one per assistant reply
pub fn merge_history(rows: Vec<Message>) -> Vec<HistoryTurn> {
    let mut turns: Vec<HistoryTurn> = Vec::new();
    let mut last_request: Option<String> = None;
    for row in rows {
        match row.role {
            MessageRole::User => turns.push(HistoryTurn::user(row.content)),
            MessageRole::Assistant => {
                let same_reply = last_request.as_deref() == Some(row.request_id.as_str())
                    && turns
                        .last()
                        .is_some_and(|t| t.role == newhorse_runner::Role::Assistant);
                match turns.last_mut() {
                    Some(last) if same_reply => last.content.push_str(&row.content),
                    _ => turns.push(HistoryTurn::assistant(row.content)),
                }
            }
            MessageRole::System => continue,
        }
        last_request = Some(row.request_id);
    }
    turns
}

fn attribution(target: &ResolvedTarget) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("provider_id".into(), json!(target.provider_id));
    metadata.insert("provider_name".into(), json!(target.provider_name));
    metadata.insert("model".into(), json!(target.model_id));
    metadata
}

/// Human summary line for a finished run
pub fn completion_summary(duration_ms: u64, usage: Option<&newhorse_runner::Usage>) -> String {
    let mut parts = vec![format!(
        "Session complete, {:.2}s",
        duration_ms as f64 / 1000.0
    )];
    if let Some(usage) = usage {
        if usage.total_tokens() > 0 {
            parts.push(format!("Tokens: {}", usage.total_tokens()));
        }
        if let Some(turns) = usage.num_turns.filter(|t| *t > 0) {
            parts.push(format!("Turns: {}", turns));
        }
        if let Some(cost) = usage.cost_usd.filter(|c| *c > 0.0) {
            parts.push(format!("Cost: ${:.4}", cost));
        }
    }
    parts.join(" | ")
}

/// The stored and delivered form of one runner event
pub fn event_message(
    project_id: &str,
    request_id: &str,
    target: &ResolvedTarget,
    event: &RunnerEvent,
) -> NewMessage {
    let mut metadata = attribution(target);
    let (role, message_type, content) = match event {
        RunnerEvent::TextDelta(text) => (MessageRole::Assistant, MessageType::Chat, text.clone()),
        RunnerEvent::ToolUse { name, input } => {
            metadata.insert("tool_name".into(), json!(name));
            metadata.insert("tool_input".into(), input.clone());
            (MessageRole::Assistant, MessageType::ToolUse, tool_summary(name, input))
        }
        RunnerEvent::Error { code, message } => {
            metadata.insert("error_code".into(), json!(code));
            (MessageRole::System, MessageType::Error, message.clone())
        }
        RunnerEvent::SessionComplete {
            duration_ms,
            usage,
            ..
        } => {
            metadata.insert("duration_ms".into(), json!(duration_ms));
            if let Some(usage) = usage {
                metadata.insert("usage".into(), json!(usage));
            }
            (
                MessageRole::System,
                MessageType::SessionComplete,
                completion_summary(*duration_ms, usage.as_ref()),
            )
        }
        RunnerEvent::Stopped => (MessageRole::System, MessageType::Stopped, "Stopped".to_string()),
    };

    let mut message = NewMessage::new(project_id, request_id, role, message_type, content);
    message.metadata = Value::Object(metadata);
    message.model_id = Some(target.model_id.clone());
    message.provider_id = Some(target.provider_id.clone());
    message
}

/// Tell a project's clients a turn was refused because one is in flight. Not persisted.
pub async fn reject_busy(project_id: &str, sink: &dyn EventSink) {
    tracing::warn!(project_id = %project_id, "Rejecting turn, project is busy");
    sink.deliver(OutboundMessage::busy()).await;
}

/// Error frame for a request that never reached a runner. Not persisted.
fn rejection(project_id: &str, request_id: &str, error: &ChatError) -> OutboundMessage {
    let mut message = NewMessage::new(
        project_id,
        request_id,
        MessageRole::System,
        MessageType::Error,
        error.to_string(),
    );
    message.metadata = json!({ "error_code": error.code() });
    OutboundMessage::from(&message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use newhorse_runner::{ErrorCode, Protocol, Role, Usage};

    fn target() -> ResolvedTarget {
        ResolvedTarget {
            provider_id: "prov1".to_string(),
            provider_name: "Deepseek".to_string(),
            protocol: Protocol::OpenAi,
            model_id: "deepseek-chat".to_string(),
            api_key: "sk-secret".to_string(),
            base_url: None,
        }
    }

    #[test]
    fn test_event_message_attribution() {
        let msg = event_message("p1", "r1", &target(), &RunnerEvent::TextDelta("hi".into()));
        assert_eq!(msg.role, MessageRole::Assistant);
        assert_eq!(msg.message_type, MessageType::Chat);
        assert_eq!(msg.metadata["provider_name"], "Deepseek");
        assert_eq!(msg.metadata["model"], "deepseek-chat");
        assert_eq!(msg.provider_id.as_deref(), Some("prov1"));
        assert!(!msg.metadata.to_string().contains("sk-secret"));
    }

    #[test]
    fn test_tool_use_and_error_metadata() {
        let tool = RunnerEvent::ToolUse {
            name: "Read".into(),
            input: json!({"file_path": "/src/main.rs"}),
        };
        let msg = event_message("p1", "r1", &target(), &tool);
        assert_eq!(msg.message_type, MessageType::ToolUse);
        assert_eq!(msg.metadata["tool_name"], "Read");
        assert_eq!(msg.metadata["tool_input"]["file_path"], "/src/main.rs");

        let err = RunnerEvent::error(ErrorCode::AuthFailed, "bad key");
        let msg = event_message("p1", "r1", &target(), &err);
        assert_eq!(msg.role, MessageRole::System);
        assert_eq!(msg.metadata["error_code"], "auth_failed");
    }

    #[test]
    fn test_completion_summary() {
        assert_eq!(completion_summary(1500, None), "Session complete, 1.50s");
        let usage = Usage {
            input_tokens: 10,
            output_tokens: 5,
            cost_usd: Some(0.0123),
            num_turns: Some(2),
        };
        assert_eq!(
            completion_summary(2000, Some(&usage)),
            "Session complete, 2.00s | Tokens: 15 | Turns: 2 | Cost: $0.0123"
        );
    }

    #[test]
    fn test_merge_history_joins_assistant_deltas() {
        let row = |request: &str, role: MessageRole, content: &str| Message {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: "p1".into(),
            request_id: request.into(),
            role,
            message_type: MessageType::Chat,
            content: content.into(),
            metadata: Value::Null,
            model_id: None,
            provider_id: None,
            created_at: String::new(),
        };
        let turns = merge_history(vec![
            row("r1", MessageRole::User, "hello"),
            row("r1", MessageRole::Assistant, "Hi "),
            row("r1", MessageRole::Assistant, "there"),
            row("r2", MessageRole::User, "again"),
            row("r2", MessageRole::Assistant, "ok"),
        ]);
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].content, "Hi there");
        assert_eq!(turns[3].content, "ok");
    }

    #[test]
    fn test_busy_guard_releases_on_drop() {
        let store = Store::open_in_memory(crate::vault::Vault::passthrough()).unwrap();
        let coordinator = Coordinator::new(store, RunnerRegistry::new(), Arc::new(Config::default()));
        let run = coordinator.try_begin("p1").unwrap();
        assert!(coordinator.is_busy("p1"));
        assert!(matches!(coordinator.try_begin("p1"), Err(ChatError::Busy)));
        assert!(coordinator.try_begin("p2").is_ok());
        drop(run);
        assert!(!coordinator.is_busy("p1"));
        assert!(!coordinator.stop("p1"));
    }
}
