mod builder;
mod events;
mod state;
mod turn;

use std::fmt::{self, Debug};
use std::sync::Arc;

use copilot_actor::{Actor, ActorDeadError};
use tokio::sync::mpsc;

pub use builder::{AgentBuilder, DEFAULT_MAX_STEPS};
pub use events::{ChatEvent, FinishReason, PendingPolicy};
use state::{AgentState, EnqueueTurn};
use turn::TurnInput;
use crate::conversation::Message;
use crate::resolver::Decisions;

/// Receives the events of one turn.
///
/// The channel closes after [`ChatEvent::Finished`]. Dropping the receiver
/// does not stop the turn.
pub type ChatEvents = mpsc::UnboundedReceiver<ChatEvent>;

/// An agent instance, which owns the history of one conversation and runs
/// its turns.
///
/// Turns run one at a time. A turn requested while another one is running
/// waits in a queue, so every turn sees the history left by the previous
/// one.
#[derive(Clone)]
pub struct Agent {
    id: Arc<str>,
    handle: Actor<AgentState>,
}

impl Agent {
    /// Returns the conversation id.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns `true` if the agent is used elsewhere: another handle to it
    /// exists, or a turn is queued or running.
    #[inline]
    pub fn is_in_use(&self) -> bool {
        self.handle.handle_count() > 1
    }

    fn enqueue(&self, input: TurnInput) -> Result<ChatEvents, ActorDeadError> {
        let (events, events_rx) = mpsc::unbounded_channel();
        self.handle.send(EnqueueTurn { input, events })?;
        Ok(events_rx)
    }

    /// Replaces the history with `messages`, then runs a turn applying
    /// `decisions` to the pending tool calls.
    ///
    /// This is what a client that keeps its own copy of the conversation
    /// calls.
    pub fn chat(
        &self,
        messages: Vec<Message>,
        decisions: Decisions,
    ) -> Result<ChatEvents, ActorDeadError> {
        self.enqueue(TurnInput::Chat {
            messages,
            decisions,
        })
    }

    /// Appends a user message, then runs a turn.
    pub fn send_message<S: Into<String>>(
        &self,
        text: S,
    ) -> Result<ChatEvents, ActorDeadError> {
        self.enqueue(TurnInput::UserText(text.into()))
    }

    /// Runs a turn on the stored history, applying `decisions` to the
    /// pending tool calls.
    pub fn confirm(
        &self,
        decisions: Decisions,
    ) -> Result<ChatEvents, ActorDeadError> {
        self.enqueue(TurnInput::Confirm(decisions))
    }

    /// Appends `"Running scheduled task: <description>"` as a user message,
    /// then runs a turn.
    pub fn execute_task<S: AsRef<str>>(
        &self,
        description: S,
    ) -> Result<ChatEvents, ActorDeadError> {
        self.enqueue(TurnInput::Task(description.as_ref().to_owned()))
    }

    /// Returns the history as of the last finished turn.
    pub async fn messages(&self) -> Result<Vec<Message>, ActorDeadError> {
        self.handle.call(|state, _| state.history.clone()).await
    }

    /// Empties the history, once the turns queued before have finished.
    pub async fn clear_history(&self) -> Result<(), ActorDeadError> {
        let mut events = self.enqueue(TurnInput::Clear)?;
        while events.recv().await.is_some() {}
        Ok(())
    }
}

impl Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent").field("id", &self.id).finish()
    }
}
