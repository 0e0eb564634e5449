//! A health copilot that assembles the agent, its tools and a model
//! provider.
//!
//! The crate includes a CLI for chatting in the terminal and serving the
//! HTTP interface. It can also be used as a library to embed the copilot in
//! another host app.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod config;
pub mod scheduler;
#[cfg(feature = "server")]
pub mod server;
mod session;
pub mod store;
pub mod tools;

pub use session::{SYSTEM_PROMPT, SessionBuilder, builtin_toolset};

/// Re-exports of [`copilot_core`] crate.
pub mod core {
    pub use copilot_core::*;
}
