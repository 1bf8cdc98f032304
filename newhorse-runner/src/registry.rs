// ABOUTME: Registry mapping each protocol to the runner that serves it.
// ABOUTME: Built once at startup; the coordinator looks runners up per request.

use crate::backends::agentic::{AgenticConfig, AgenticRunner};
use crate::backends::completion::{CompletionConfig, CompletionRunner};
use crate::error::RunnerError;
use crate::target::Protocol;
use crate::traits::Runner;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry for protocol-based runner selection
#[derive(Clone, Default)]
pub struct RunnerRegistry {
    runners: HashMap<Protocol, Arc<dyn Runner>>,
}

impl RunnerRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the runner serving a protocol, replacing any previous one
    pub fn register<R>(mut self, protocol: Protocol, runner: R) -> Self
    where
        R: Runner + 'static,
    {
        self.runners.insert(protocol, Arc::new(runner));
        self
    }

    /// Look up the runner for a protocol
    pub fn get(&self, protocol: Protocol) -> Result<Arc<dyn Runner>> {
        self.runners
            .get(&protocol)
            .cloned()
            .ok_or_else(|| RunnerError::UnsupportedProtocol(protocol.to_string()).into())
    }

    /// List registered protocols
    pub fn available(&self) -> Vec<Protocol> {
        let mut protocols: Vec<Protocol> = self.runners.keys().copied().collect();
        protocols.sort_by_key(|p| p.as_str());
        protocols
    }

    /// The production wiring: agent CLI for anthropic, HTTP for openai
    pub fn standard(agentic: AgenticConfig, completion: CompletionConfig) -> Result<Self> {
        Ok(Self::new()
            .register(Protocol::Anthropic, AgenticRunner::new(agentic))
            .register(Protocol::OpenAi, CompletionRunner::new(completion)?))
    }
}
