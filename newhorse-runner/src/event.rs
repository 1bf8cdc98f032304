// ABOUTME: Event types emitted by runners while serving one chat request.
// ABOUTME: A closed set: text deltas, tool use, and the three terminal kinds.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events emitted by a runner during one request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RunnerEvent {
    /// Incremental assistant text
    TextDelta(String),

    /// The agent invoked a tool
    ToolUse {
        /// Tool name (e.g., "Read", "Bash", "Edit")
        name: String,
        /// Full input passed to the tool
        input: Value,
    },

    /// The request failed. Terminal.
    Error {
        /// Typed error code for programmatic handling
        code: ErrorCode,
        /// Human-readable message, usually the backend's own wording
        message: String,
    },

    /// The backend finished normally. Terminal.
    SessionComplete {
        /// Wall-clock duration of the run in milliseconds
        duration_ms: u64,
        /// Token usage and cost (if the backend reported it)
        usage: Option<Usage>,
        /// Opaque token for continuing a stateful agent session
        session_token: Option<String>,
    },

    /// The request was cancelled by the client. Terminal.
    Stopped,
}

impl RunnerEvent {
    /// Whether this event ends the request
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunnerEvent::Error { .. } | RunnerEvent::SessionComplete { .. } | RunnerEvent::Stopped
        )
    }

    /// Convenience constructor for error events
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        RunnerEvent::Error {
            code,
            message: message.into(),
        }
    }
}

/// Typed error codes for programmatic handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Upstream call or stream timed out
    Timeout,
    /// Rate limited by the backend
    RateLimited,
    /// Credential rejected
    AuthFailed,
    /// Stream ended without a terminal event
    Incomplete,
    /// Backend-specific error
    BackendError,
}

impl ErrorCode {
    /// Classify an HTTP status returned by an upstream API
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ErrorCode::AuthFailed,
            408 | 504 => ErrorCode::Timeout,
            429 => ErrorCode::RateLimited,
            _ => ErrorCode::BackendError,
        }
    }

    /// Best-effort classification of a free-form backend message
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            ErrorCode::Timeout
        } else if lower.contains("rate limit") || lower.contains("429") {
            ErrorCode::RateLimited
        } else if lower.contains("api key")
            || lower.contains("authentication")
            || lower.contains("unauthorized")
        {
            ErrorCode::AuthFailed
        } else {
            ErrorCode::BackendError
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Timeout => "timeout",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::AuthFailed => "auth_failed",
            ErrorCode::Incomplete => "incomplete",
            ErrorCode::BackendError => "backend_error",
        }
    }
}

/// Token usage and cost tracking
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    /// Input tokens consumed
    pub input_tokens: u64,
    /// Output tokens generated
    pub output_tokens: u64,
    /// Total cost in USD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Agent turns taken (agentic backends only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_turns: Option<u64>,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}
