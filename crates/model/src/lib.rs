//! An abstraction layer over hosted language models.
//!
//! The agent talks to every model through the protocol defined here: a
//! request carries the model-facing history and the tool definitions, and
//! a response is a stream of events (text deltas, tool call requests and a
//! final completion marker).
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that provider implementations should adhere to. Transport
//! details such as wire framing, authentication and timeouts belong to the
//! providers themselves.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
