//! Core logic of the copilot: the conversation model, tools, the
//! confirmation resolver and the agent that runs turns against a model.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod conversation;
mod model_client;
pub mod resolver;
pub mod schedule;
pub mod store;
pub mod tool;

pub use agent::{
    Agent, AgentBuilder, ChatEvent, ChatEvents, DEFAULT_MAX_STEPS,
    FinishReason, PendingPolicy,
};
pub use copilot_actor::ActorDeadError;
pub use resolver::{Decision, Decisions};
