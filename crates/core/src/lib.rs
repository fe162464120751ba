//! Core logic including the agent loop, tool execution and transcripts.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod conversation;
mod model_client;
pub mod tool;

pub use agent::{
    Agent, AgentBuilder, AgentLimits, BuildError, Completion, Error, Outcome,
    StopReason,
};
pub use conversation::Conversation;
pub use model_client::{ModelClient, ModelClientResponse};
