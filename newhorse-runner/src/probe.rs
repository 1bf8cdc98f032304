// ABOUTME: Connectivity probe for a configured provider.
// ABOUTME: Sends the smallest possible request and reports latency or the backend error.

use crate::backends::completion::chat_completions_url;
use crate::error::{extract_error_message, RunnerError};
use crate::target::{Protocol, ResolvedTarget};
use anyhow::{Context, Result};
use serde_json::json;
use std::time::{Duration, Instant};

const ANTHROPIC_DEFAULT_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// `{base}/v1/messages` for the Anthropic messages API
pub fn anthropic_messages_url(base_url: Option<&str>) -> String {
    let base = base_url
        .unwrap_or(ANTHROPIC_DEFAULT_BASE)
        .trim_end_matches('/');
    format!("{}/v1/messages", base)
}

/// Probe the target with a one-token request.
///
/// Returns the round-trip latency on success. Non-2xx responses become a
/// `RunnerError::Status` carrying the backend's own message.
pub async fn verify(client: &reqwest::Client, target: &ResolvedTarget) -> Result<Duration> {
    let body = json!({
        "model": target.model_id,
        "max_tokens": 1,
        "messages": [{"role": "user", "content": "hi"}],
    });

    let request = match target.protocol {
        Protocol::OpenAi => client
            .post(chat_completions_url(target.base_url.as_deref()))
            .bearer_auth(&target.api_key),
        Protocol::Anthropic => client
            .post(anthropic_messages_url(target.base_url.as_deref()))
            .header("x-api-key", &target.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION),
    };

    tracing::debug!(
        provider = %target.provider_name,
        protocol = %target.protocol,
        model = %target.model_id,
        "Verifying provider"
    );

    let started = Instant::now();
    let response = request
        .json(&body)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", target.provider_name))?;
    let latency = started.elapsed();

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(RunnerError::Status {
            status: status.as_u16(),
            message: extract_error_message(&text),
        }
        .into());
    }

    Ok(latency)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anthropic_url() {
        assert_eq!(
            anthropic_messages_url(None),
            "https://api.anthropic.com/v1/messages"
        );
        assert_eq!(
            anthropic_messages_url(Some("https://proxy.local/")),
            "https://proxy.local/v1/messages"
        );
    }
}
