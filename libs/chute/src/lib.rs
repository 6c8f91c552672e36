//! Chute lifecycle orchestration for the Paradrop agent.
//!
//! User intents (create/update/delete/start/stop/restart) become prioritized
//! multi-phase plans executed across the container runtime, the dynamic
//! network allocator, and the confd reconciler, with abort entries that
//! unwind partial work on failure.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod chute;
pub mod container;
pub mod context;
pub mod docker;
mod error;
pub mod network;
pub mod plan;
mod plans;
pub mod pool;
pub mod update;

pub use chute::Chute;
pub use context::{AgentContext, Settings};
pub use error::{ContainerError, Error};
pub use update::{Update, UpdateRequest, UpdateResult, UpdateType};

pub type Result<T, E = Error> = std::result::Result<T, E>;
