use std::error::Error;
use std::fmt;

/// Returned when a message is sent to an actor that is no longer running.
///
/// An actor stops once every handle to it is dropped, or when one of its
/// message handlers panics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActorDeadError;

impl fmt::Display for ActorDeadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        "the actor is no longer running".fmt(f)
    }
}

impl Error for ActorDeadError {}
