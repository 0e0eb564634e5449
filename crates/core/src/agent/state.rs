use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::sync::Arc;

use copilot_actor::{Actor, Message as ActorMessage};
use tokio::sync::mpsc;
use tracing::Instrument;

use super::events::{ChatEvent, FinishReason, PendingPolicy};
use super::turn::{Turn, TurnInput, TurnOutcome};
use super::Agent;
use crate::conversation::Message;
use crate::model_client::ModelClient;
use crate::store::ConversationStore;
use crate::tool::{ToolContext, Toolset};

struct QueuedTurn {
    input: TurnInput,
    events: mpsc::UnboundedSender<ChatEvent>,
}

/// State of the agent actor.
///
/// Messages are handled immediately, whatever the agent is doing. A turn
/// requested while another one runs is queued, and started once the
/// running turn has reported back.
pub struct AgentState {
    pub(super) id: Arc<str>,
    pub(super) history: Vec<Message>,
    pub(super) model_client: ModelClient,
    pub(super) toolset: Arc<Toolset>,
    pub(super) system_prompt: Option<String>,
    pub(super) max_steps: usize,
    pub(super) pending_policy: PendingPolicy,
    pub(super) store: Option<Arc<dyn ConversationStore>>,
    pub(super) on_idle: Option<Box<dyn Fn() + Send + Sync>>,
    busy: bool,
    queue: VecDeque<QueuedTurn>,
}

impl AgentState {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        id: Arc<str>,
        history: Vec<Message>,
        model_client: ModelClient,
        toolset: Arc<Toolset>,
        system_prompt: Option<String>,
        max_steps: usize,
        pending_policy: PendingPolicy,
        store: Option<Arc<dyn ConversationStore>>,
        on_idle: Option<Box<dyn Fn() + Send + Sync>>,
    ) -> Self {
        Self {
            id,
            history,
            model_client,
            toolset,
            system_prompt,
            max_steps,
            pending_policy,
            store,
            on_idle,
            busy: false,
            queue: VecDeque::new(),
        }
    }

    fn enqueue_turn(&mut self, turn: QueuedTurn, handle: &Actor<Self>) {
        self.queue.push_back(turn);
        if self.busy {
            // The running turn starts the next one when it finishes.
            trace!("turn queued, {} waiting", self.queue.len());
            return;
        }
        self.start_next_turn(handle);
    }

    fn start_next_turn(&mut self, handle: &Actor<Self>) {
        let Some(QueuedTurn { input, events }) = self.queue.pop_front() else {
            if let Some(on_idle) = &self.on_idle {
                on_idle();
            }
            return;
        };
        self.busy = true;

        let agent = Agent {
            id: Arc::clone(&self.id),
            handle: handle.clone(),
        };
        let previous = self.history.clone();
        let turn = Turn {
            history: self.history.clone(),
            input,
            model_client: self.model_client.clone(),
            toolset: Arc::clone(&self.toolset),
            system_prompt: self.system_prompt.clone(),
            max_steps: self.max_steps,
            pending_policy: self.pending_policy,
            store: self.store.clone(),
            ctx: ToolContext::for_agent(agent),
            events: events.clone(),
        };
        let handle = handle.clone();
        let span = debug_span!("turn", conversation = &*self.id);
        tokio::spawn(
            async move {
                // A panicking turn must still report back, or the agent
                // would stay busy forever.
                let run = tokio::spawn(turn.run().in_current_span());
                let outcome = match run.await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        error!("turn failed: {err}");
                        let message = format!("turn failed: {err}");
                        events.send(ChatEvent::Error { message }).ok();
                        TurnOutcome {
                            history: previous,
                            reason: FinishReason::Failed,
                        }
                    }
                };
                handle.send(TurnFinished { outcome, events }).ok();
            }
            .instrument(span),
        );
    }
}

#[derive(Debug)]
pub(super) struct EnqueueTurn {
    pub input: TurnInput,
    pub events: mpsc::UnboundedSender<ChatEvent>,
}

impl ActorMessage<AgentState> for EnqueueTurn {
    fn handle(self, state: &mut AgentState, handle: &Actor<AgentState>) {
        let turn = QueuedTurn {
            input: self.input,
            events: self.events,
        };
        state.enqueue_turn(turn, handle);
    }
}

struct TurnFinished {
    outcome: TurnOutcome,
    events: mpsc::UnboundedSender<ChatEvent>,
}

impl Debug for TurnFinished {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnFinished")
            .field("reason", &self.outcome.reason)
            .field("messages", &self.outcome.history.len())
            .finish_non_exhaustive()
    }
}

impl ActorMessage<AgentState> for TurnFinished {
    fn handle(self, state: &mut AgentState, handle: &Actor<AgentState>) {
        let reason: FinishReason = self.outcome.reason;
        debug!("turn finished: {reason:?}");
        state.history = self.outcome.history;
        state.busy = false;
        // The history is committed before anyone learns the turn is over.
        self.events.send(ChatEvent::Finished { reason }).ok();
        state.start_next_turn(handle);
    }
}
