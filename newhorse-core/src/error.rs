// ABOUTME: Error taxonomy for chat execution and registry management.
// ABOUTME: Each variant carries the machine-readable code sent to clients.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChatError {
    /// Resolution could not produce a usable target. Never retried.
    #[error("{0}")]
    Configuration(String),

    /// A store write or read failed. Logged, never surfaced mid-stream.
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// Another request is in flight for the same project
    #[error("A request is already running for this project")]
    Busy,

    #[error("{0} not found")]
    NotFound(String),

    /// A registry invariant or input validation rejected the change
    #[error("{0}")]
    Invalid(String),
}

impl ChatError {
    pub fn configuration(message: impl Into<String>) -> Self {
        ChatError::Configuration(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ChatError::Invalid(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Configuration(_) => "configuration",
            ChatError::Persistence(_) => "persistence",
            ChatError::Busy => "busy",
            ChatError::NotFound(_) => "not_found",
            ChatError::Invalid(_) => "invalid",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ChatError::configuration("no key").code(), "configuration");
        assert_eq!(ChatError::Persistence("disk".into()).code(), "persistence");
        assert_eq!(ChatError::Busy.code(), "busy");
        assert_eq!(ChatError::NotFound("Provider".into()).code(), "not_found");
        assert_eq!(ChatError::invalid("bad").code(), "invalid");
    }

    #[test]
    fn test_display_carries_message() {
        assert_eq!(ChatError::configuration("No API key").to_string(), "No API key");
        assert_eq!(ChatError::NotFound("Provider".into()).to_string(), "Provider not found");
    }
}
