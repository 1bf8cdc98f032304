// ABOUTME: Core Runner trait that every protocol adapter implements.
// ABOUTME: Defines the per-request input and the raw event stream type.

use crate::target::ResolvedTarget;
use crate::RunnerEvent;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw event stream produced by a runner.
///
/// Errors are allowed here; the guard in `crate::guard` turns them into a
/// single terminal `RunnerEvent::Error` before anything reaches a client.
pub type RawEventStream = BoxStream<'static, anyhow::Result<RunnerEvent>>;

/// Speaker of a prior conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One prior turn replayed to stateless backends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
}

impl HistoryTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Everything a runner needs to serve one request
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// The new user instruction
    pub instruction: String,
    /// Frozen backend target for this request
    pub target: ResolvedTarget,
    /// Project working directory
    pub working_dir: Option<PathBuf>,
    /// Optional system prompt
    pub system_prompt: Option<String>,
    /// Prior turns, oldest first (used by stateless backends)
    pub history: Vec<HistoryTurn>,
    /// Agent session to continue (used by stateful backends)
    pub session_token: Option<String>,
}

/// Core trait that all runners implement.
///
/// `stream` must return immediately; the work happens as the stream is
/// polled. Dropping the stream must release the upstream call.
pub trait Runner: Send + Sync {
    /// Runner name for logging
    fn name(&self) -> &'static str;

    /// Serve one request as a lazy stream of events
    fn stream(&self, request: RunRequest) -> RawEventStream;
}
