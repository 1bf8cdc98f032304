// ABOUTME: Mock runner for testing - returns pre-configured event scripts.
// ABOUTME: Allows deterministic tests without spawning agents or calling HTTP APIs.
//!
//! # Example
//!
//! ```no_run
//! use newhorse_runner::backends::mock::MockRunner;
//! use newhorse_runner::{Runner, RunnerEvent};
//! use serde_json::json;
//!
//! let mock = MockRunner::new()
//!     .on_prompt("hello").respond_text("Hi there!")
//!     .on_prompt("read file").respond_with(vec![
//!         RunnerEvent::ToolUse {
//!             name: "Read".to_string(),
//!             input: json!({"file_path": "/tmp/foo"}),
//!         },
//!         RunnerEvent::TextDelta("Read the file".to_string()),
//!         RunnerEvent::SessionComplete {
//!             duration_ms: 10,
//!             usage: None,
//!             session_token: None,
//!         },
//!     ]);
//! assert_eq!(mock.name(), "mock");
//! ```

use crate::event::{ErrorCode, RunnerEvent};
use crate::traits::{RawEventStream, RunRequest, Runner};
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock runner for testing
#[derive(Clone)]
pub struct MockRunner {
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
    received: Arc<Mutex<Vec<RunRequest>>>,
    delay: Option<Duration>,
}

struct Expectation {
    pattern: String,
    script: Vec<Step>,
}

enum Step {
    Emit(RunnerEvent),
    Fail(String),
}

impl MockRunner {
    /// Create a new mock runner with no expectations
    pub fn new() -> Self {
        Self {
            expectations: Arc::new(Mutex::new(VecDeque::new())),
            received: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Sleep before every emitted event
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set up an expectation for an instruction containing the given pattern
    pub fn on_prompt(self, pattern: &str) -> ExpectationBuilder {
        ExpectationBuilder {
            runner: self,
            pattern: pattern.to_string(),
        }
    }

    /// Requests seen so far, in arrival order
    pub fn received(&self) -> Vec<RunRequest> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn push(&self, pattern: String, script: Vec<Step>) {
        self.expectations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Expectation { pattern, script });
    }

    // FIFO preference: try the front first, then the first match anywhere.
    fn take_script(&self, text: &str) -> Option<Vec<Step>> {
        let mut exp = self.expectations.lock().unwrap_or_else(|e| e.into_inner());
        match exp.front() {
            Some(front) if text.contains(&front.pattern) => exp.pop_front().map(|e| e.script),
            Some(_) => exp
                .iter()
                .position(|e| text.contains(&e.pattern))
                .and_then(|i| exp.remove(i))
                .map(|e| e.script),
            None => None,
        }
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner for MockRunner {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn stream(&self, request: RunRequest) -> RawEventStream {
        let script = self.take_script(&request.instruction).unwrap_or_else(|| {
            vec![
                Step::Emit(RunnerEvent::TextDelta(format!(
                    "Mock: no expectation for '{}'",
                    request.instruction
                ))),
                Step::Emit(RunnerEvent::SessionComplete {
                    duration_ms: 0,
                    usage: None,
                    session_token: None,
                }),
            ]
        });

        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);

        let delay = self.delay;
        stream::iter(script)
            .then(move |step| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                match step {
                    Step::Emit(event) => Ok(event),
                    Step::Fail(message) => Err(anyhow::anyhow!(message)),
                }
            })
            .boxed()
    }
}

/// Builder for setting up mock expectations with a fluent API
pub struct ExpectationBuilder {
    runner: MockRunner,
    pattern: String,
}

impl ExpectationBuilder {
    /// Respond with a list of events, emitted as-is
    pub fn respond_with(self, events: Vec<RunnerEvent>) -> MockRunner {
        self.runner
            .push(self.pattern, events.into_iter().map(Step::Emit).collect());
        self.runner
    }

    /// Respond with one text delta followed by a completion
    pub fn respond_text(self, text: &str) -> MockRunner {
        self.respond_with(vec![
            RunnerEvent::TextDelta(text.to_string()),
            RunnerEvent::SessionComplete {
                duration_ms: 1,
                usage: None,
                session_token: None,
            },
        ])
    }

    /// Respond with a terminal error event
    pub fn respond_error(self, code: ErrorCode, message: &str) -> MockRunner {
        self.respond_with(vec![RunnerEvent::error(code, message)])
    }

    /// Emit the given events, then fail the raw stream with `message`
    pub fn fail_after(self, events: Vec<RunnerEvent>, message: &str) -> MockRunner {
        let mut script: Vec<Step> = events.into_iter().map(Step::Emit).collect();
        script.push(Step::Fail(message.to_string()));
        self.runner.push(self.pattern, script);
        self.runner
    }
}
