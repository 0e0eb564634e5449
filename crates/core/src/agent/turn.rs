use std::sync::{Arc, Mutex, MutexGuard};

use copilot_model::{ModelFinishReason, ModelMessage, ModelRequest};
use futures_util::future::join_all;
use tokio::sync::mpsc;

use super::events::{ChatEvent, FinishReason, PendingPolicy};
use crate::conversation::{
    Message, Role, SCHEDULED_TASK_PREFIX, ToolInvocation, to_model_messages,
};
use crate::model_client::ModelClient;
use crate::resolver::{Decisions, resolve_tool_calls};
use crate::store::ConversationStore;
use crate::tool::{ToolContext, Toolset};

/// What a queued turn was asked to do.
#[derive(Debug)]
pub(crate) enum TurnInput {
    Chat {
        messages: Vec<Message>,
        decisions: Decisions,
    },
    UserText(String),
    Confirm(Decisions),
    Task(String),
    Clear,
}

/// Everything a turn needs, detached from the agent state so that the turn
/// can run on its own task.
pub(crate) struct Turn {
    pub history: Vec<Message>,
    pub input: TurnInput,
    pub model_client: ModelClient,
    pub toolset: Arc<Toolset>,
    pub system_prompt: Option<String>,
    pub max_steps: usize,
    pub pending_policy: PendingPolicy,
    pub store: Option<Arc<dyn ConversationStore>>,
    pub ctx: ToolContext,
    pub events: mpsc::UnboundedSender<ChatEvent>,
}

fn lock(text: &Mutex<String>) -> MutexGuard<'_, String> {
    text.lock().unwrap_or_else(|err| err.into_inner())
}

pub(crate) struct TurnOutcome {
    pub history: Vec<Message>,
    pub reason: FinishReason,
}

impl Turn {
    fn emit(&self, event: ChatEvent) {
        // The receiver goes away when the client disconnects, the turn
        // keeps running regardless.
        self.events.send(event).ok();
    }

    pub async fn run(mut self) -> TurnOutcome {
        let input = std::mem::replace(&mut self.input, TurnInput::Clear);
        let decisions = match input {
            TurnInput::Chat {
                messages,
                decisions,
            } => {
                self.history = messages;
                decisions
            }
            TurnInput::UserText(text) => {
                self.history.push(Message::user(text));
                Decisions::new()
            }
            TurnInput::Confirm(decisions) => decisions,
            TurnInput::Task(description) => {
                self.history.push(Message::user(format!(
                    "{SCHEDULED_TASK_PREFIX}{description}"
                )));
                Decisions::new()
            }
            TurnInput::Clear => {
                self.history.clear();
                if let Some(store) = &self.store {
                    let id = self.ctx.conversation_id();
                    if let Err(err) = store.delete(id).await {
                        error!("failed to delete the history: {err}");
                        self.emit(ChatEvent::Error {
                            message: err.to_string(),
                        });
                    }
                }
                return TurnOutcome {
                    history: self.history,
                    reason: FinishReason::Cleared,
                };
            }
        };

        let reason = self.resolve_and_respond(&decisions).await;
        self.persist().await;
        TurnOutcome {
            history: self.history,
            reason,
        }
    }

    async fn resolve_and_respond(
        &mut self,
        decisions: &Decisions,
    ) -> FinishReason {
        let history = std::mem::take(&mut self.history);
        let resolution =
            resolve_tool_calls(history, &self.toolset, decisions, &self.ctx)
                .await;
        self.history = resolution.messages;
        for call in resolution.resolved {
            self.emit(ChatEvent::ToolResult {
                tool_call_id: call.tool_call_id,
                tool_name: call.tool_name,
                result: call.result,
            });
        }

        if !resolution.pending.is_empty() {
            match self.pending_policy {
                PendingPolicy::Hold => {
                    let count = resolution.pending.len();
                    debug!("holding the turn for {count} pending calls");
                    self.emit(ChatEvent::AwaitingConfirmation {
                        tool_call_ids: resolution.pending,
                    });
                    return FinishReason::AwaitingConfirmation;
                }
                PendingPolicy::Omit => {
                    let count = resolution.pending.len();
                    debug!("omitting {count} pending calls");
                }
            }
        }

        self.model_loop().await
    }

    fn build_request(&self) -> ModelRequest {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        if let Some(system_prompt) = &self.system_prompt {
            messages.push(ModelMessage::System(system_prompt.clone()));
        }
        messages.extend(to_model_messages(&self.history));
        ModelRequest {
            messages,
            tools: self.toolset.definitions(),
        }
    }

    async fn model_loop(&mut self) -> FinishReason {
        // All steps of this turn write into one assistant message.
        let mut reply = Message::new(Role::Assistant);
        let reply_idx = self.history.len();
        self.history.push(reply.clone());

        for step in 0..self.max_steps {
            trace!("step {step}");
            let request = self.build_request();
            let streamed = Arc::new(Mutex::new(String::new()));
            let on_delta = {
                let events = self.events.clone();
                let streamed = Arc::clone(&streamed);
                let message_id = reply.id.clone();
                move |delta: &str| {
                    lock(&streamed).push_str(delta);
                    events
                        .send(ChatEvent::TextDelta {
                            message_id: message_id.clone(),
                            delta: delta.to_owned(),
                        })
                        .ok();
                }
            };
            let result =
                self.model_client.send_request(request, on_delta).await;

            // The client has seen every delta, even of a failed request.
            let text = std::mem::take(&mut *lock(&streamed));
            if !text.is_empty() {
                reply.push_text(&text);
            }
            let response = match result {
                Ok(response) => response,
                Err(err) => {
                    error!("model request failed: {err}");
                    self.emit(ChatEvent::Error {
                        message: err.to_string(),
                    });
                    self.commit_reply(reply_idx, reply);
                    return FinishReason::Failed;
                }
            };

            if response.finish_reason == Some(ModelFinishReason::Length) {
                warn!("the reply was cut by the token limit");
            }
            if response.tool_calls.is_empty() {
                self.commit_reply(reply_idx, reply);
                return FinishReason::Completed;
            }

            let mut runs = vec![];
            let mut pending = vec![];
            for request in response.tool_calls {
                let requires_confirmation =
                    self.toolset.requires_confirmation(&request.name);
                self.emit(ChatEvent::ToolCall {
                    message_id: reply.id.clone(),
                    tool_call_id: request.id.clone(),
                    tool_name: request.name.clone(),
                    args: request.arguments.clone(),
                    requires_confirmation,
                });
                if requires_confirmation {
                    pending.push(request.id.clone());
                } else {
                    // Unknown tools are run too, and answered with an error.
                    let run = self.toolset.run(
                        &request.name,
                        request.arguments.clone(),
                        &self.ctx,
                    );
                    runs.push((reply.parts.len(), run));
                }
                reply.parts.push(ToolInvocation::call(request).into());
            }

            let (positions, futures): (Vec<_>, Vec<_>) =
                runs.into_iter().unzip();
            let results = join_all(futures).await;
            for (part_idx, result) in positions.into_iter().zip(results) {
                let part = &mut reply.parts[part_idx];
                let Some(invocation) = part.as_tool_invocation_mut() else {
                    continue;
                };
                invocation.set_result(result.clone());
                self.emit(ChatEvent::ToolResult {
                    tool_call_id: invocation.tool_call_id.clone(),
                    tool_name: invocation.tool_name.clone(),
                    result,
                });
            }
            self.commit_reply(reply_idx, reply.clone());

            if !pending.is_empty() {
                self.emit(ChatEvent::AwaitingConfirmation {
                    tool_call_ids: pending,
                });
                return FinishReason::AwaitingConfirmation;
            }
        }

        warn!("step limit of {} reached", self.max_steps);
        self.commit_reply(reply_idx, reply);
        FinishReason::StepLimit
    }

    fn commit_reply(&mut self, reply_idx: usize, reply: Message) {
        if reply.parts.is_empty() {
            self.history.remove(reply_idx);
        } else {
            self.history[reply_idx] = reply;
        }
    }

    async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let id = self.ctx.conversation_id();
        if let Err(err) = store.save(id, &self.history).await {
            error!("failed to save the history of {id}: {err}");
            self.emit(ChatEvent::Error {
                message: err.to_string(),
            });
        }
    }
}
