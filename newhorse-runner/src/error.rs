// ABOUTME: Typed upstream failures raised inside runners.
// ABOUTME: The stream guard downcasts these to pick an ErrorCode.

use crate::event::ErrorCode;
use serde_json::Value;
use thiserror::Error;

/// Failures raised by a runner before they are normalized into an Error event
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },

    #[error("Upstream stream idle for more than {0}s")]
    IdleTimeout(u64),

    #[error("Agent run timed out after {0}s")]
    RunTimeout(u64),

    #[error("No runner registered for protocol: {0}")]
    UnsupportedProtocol(String),
}

impl RunnerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RunnerError::Status { status, .. } => ErrorCode::from_status(*status),
            RunnerError::IdleTimeout(_) | RunnerError::RunTimeout(_) => ErrorCode::Timeout,
            RunnerError::UnsupportedProtocol(_) => ErrorCode::BackendError,
        }
    }
}

/// Map an anyhow error coming out of a runner to an error code
pub fn code_for(err: &anyhow::Error) -> ErrorCode {
    match err.downcast_ref::<RunnerError>() {
        Some(runner_err) => runner_err.code(),
        None => ErrorCode::classify(&format!("{:#}", err)),
    }
}

const MAX_ERROR_BODY: usize = 500;

/// Pull a readable message out of an upstream error body.
///
/// Understands `{"error": {"message": ..}}`, `{"error": ".."}` and
/// `{"message": ..}`; anything else is returned trimmed and truncated.
pub fn extract_error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let message = json
            .get("error")
            .and_then(|e| match e {
                Value::String(s) => Some(s.as_str()),
                Value::Object(_) => e.get("message").and_then(|m| m.as_str()),
                _ => None,
            })
            .or_else(|| json.get("message").and_then(|m| m.as_str()));
        if let Some(message) = message {
            return message.to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_openai_style_error() {
        let body = r#"{"error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}}"#;
        assert_eq!(extract_error_message(body), "Incorrect API key provided");
    }

    #[test]
    fn test_extract_flat_error_string() {
        assert_eq!(extract_error_message(r#"{"error": "overloaded"}"#), "overloaded");
    }

    #[test]
    fn test_extract_plain_text_body() {
        assert_eq!(extract_error_message("  Bad Gateway \n"), "Bad Gateway");
        assert_eq!(extract_error_message(""), "empty response body");
    }

    #[test]
    fn test_status_codes_map_to_error_codes() {
        let err = RunnerError::Status {
            status: 429,
            message: "slow down".to_string(),
        };
        assert_eq!(err.code(), ErrorCode::RateLimited);
        assert_eq!(err.to_string(), "slow down (HTTP 429)");

        let err = anyhow::Error::from(RunnerError::Status {
            status: 401,
            message: "bad key".to_string(),
        });
        assert_eq!(code_for(&err), ErrorCode::AuthFailed);
    }

    #[test]
    fn test_untyped_errors_are_classified_by_message() {
        let err = anyhow::anyhow!("connection timed out");
        assert_eq!(code_for(&err), ErrorCode::Timeout);
        let err = anyhow::anyhow!("something odd");
        assert_eq!(code_for(&err), ErrorCode::BackendError);
    }
}
