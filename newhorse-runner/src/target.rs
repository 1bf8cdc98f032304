// ABOUTME: Protocol tags and the frozen per-request backend target.
// ABOUTME: ResolvedTarget is produced by resolution and never persisted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Wire protocol spoken by a provider. Closed set; add a variant plus a
/// registered runner to support a new protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Stateful tool-using agent (served by the agent CLI)
    Anthropic,
    /// Stateless OpenAI-compatible chat completions
    #[serde(rename = "openai")]
    OpenAi,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Anthropic => "anthropic",
            Protocol::OpenAi => "openai",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anthropic" => Ok(Protocol::Anthropic),
            "openai" => Ok(Protocol::OpenAi),
            _ => anyhow::bail!("Unknown protocol: {}", s),
        }
    }
}

/// The concrete backend chosen for exactly one request.
///
/// Built once by resolution and moved into the runner; edits to the registry
/// made while the request streams do not affect it.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub provider_id: String,
    pub provider_name: String,
    pub protocol: Protocol,
    pub model_id: String,
    /// Decrypted credential
    pub api_key: String,
    /// Optional base endpoint; None means the protocol's public default
    pub base_url: Option<String>,
}

// Custom Debug impl to redact the credential
impl fmt::Debug for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedTarget")
            .field("provider_id", &self.provider_id)
            .field("provider_name", &self.provider_name)
            .field("protocol", &self.protocol)
            .field("model_id", &self.model_id)
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}
