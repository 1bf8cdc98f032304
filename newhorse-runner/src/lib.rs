// ABOUTME: Runner abstraction for newhorse - one lazy event stream per backend protocol.
// ABOUTME: Provides the Runner trait, stream guard, registry, and agentic/completion/mock runners.

pub mod error;
pub mod event;
pub mod guard;
pub mod probe;
pub mod registry;
pub mod summary;
pub mod target;
pub mod traits;

pub mod backends;

pub use error::RunnerError;
pub use event::{ErrorCode, RunnerEvent, Usage};
pub use guard::{guard, GuardedStream};
pub use registry::RunnerRegistry;
pub use target::{Protocol, ResolvedTarget};
pub use traits::{HistoryTurn, RawEventStream, Role, RunRequest, Runner};
