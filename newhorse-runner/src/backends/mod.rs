// ABOUTME: Runner implementations (agentic CLI, OpenAI-compatible completion, mock).
// ABOUTME: Each runner implements the Runner trait.

pub mod agentic;
pub mod completion;
pub mod mock;
