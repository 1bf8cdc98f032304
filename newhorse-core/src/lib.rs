// ABOUTME: Chat execution core - registry storage, credential vault, resolution, and coordination.
// ABOUTME: Transport-agnostic; the server crate feeds it frames and supplies an EventSink.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod paths;
pub mod resolve;
pub mod store;
pub mod vault;
pub mod wire;

pub use config::Config;
pub use coordinator::{reject_busy, Coordinator, EventSink, ExecutionState, RunGuard};
pub use error::ChatError;
pub use resolve::{resolve, Hints};
pub use store::Store;
pub use vault::Vault;
pub use wire::{ChatRequest, InboundMessage, OutboundMessage};

// Re-export runner types used at the server boundary
pub use newhorse_runner::{Protocol, ResolvedTarget, RunnerEvent, RunnerRegistry};
