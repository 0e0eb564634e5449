//! Conversation-related types.
//!
//! Messages use the same JSON shape as the chat clients: each message has
//! an ordered list of parts, and a tool invocation part moves from the
//! `call` state to the `result` state once the tool has produced a value.

use chrono::{DateTime, Utc};
use copilot_model::{ModelMessage, ToolCallRequest, ToolCallResult};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix marking a text that was delivered by the scheduler rather than
/// typed by the user.
pub const SCHEDULED_MESSAGE_PREFIX: &str = "scheduled message: ";

/// Prefix of the user message appended when a scheduled task fires.
pub const SCHEDULED_TASK_PREFIX: &str = "Running scheduled task: ";

/// Author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human side of the conversation.
    User,
    /// The model side of the conversation.
    Assistant,
}

/// A message in the conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireMessage")]
pub struct Message {
    /// Unique identifier of the message.
    pub id: String,
    /// Author of the message.
    pub role: Role,
    /// Ordered contents of the message.
    pub parts: Vec<Part>,
    /// When the message was created.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Creates an empty message with a fresh id.
    pub fn new(role: Role) -> Self {
        Self {
            id: new_message_id(),
            role,
            parts: vec![],
            created_at: Utc::now(),
        }
    }

    /// Creates a user message with a single text part.
    pub fn user<S: Into<String>>(text: S) -> Self {
        let mut msg = Self::new(Role::User);
        msg.parts.push(Part::text(text));
        msg
    }

    /// Creates an assistant message with a single text part.
    pub fn assistant<S: Into<String>>(text: S) -> Self {
        let mut msg = Self::new(Role::Assistant);
        msg.parts.push(Part::text(text));
        msg
    }

    /// Concatenates all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text { text } => Some(text.as_str()),
                Part::ToolInvocation { .. } => None,
            })
            .collect()
    }

    /// Iterates over the tool invocations of this message.
    pub fn tool_invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.parts.iter().filter_map(Part::as_tool_invocation)
    }

    /// Appends streamed text, extending the last part if it is a text.
    pub fn push_text(&mut self, delta: &str) {
        if let Some(Part::Text { text }) = self.parts.last_mut() {
            text.push_str(delta);
            return;
        }
        self.parts.push(Part::text(delta));
    }
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A piece of a message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// A tool call requested by the model.
    #[serde(rename_all = "camelCase")]
    ToolInvocation {
        /// The invocation details.
        tool_invocation: ToolInvocation,
    },
}

impl Part {
    /// Creates a text part.
    #[inline]
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self::Text { text: text.into() }
    }

    /// Returns the tool invocation if this is a tool invocation part.
    #[inline]
    pub fn as_tool_invocation(&self) -> Option<&ToolInvocation> {
        match self {
            Part::ToolInvocation { tool_invocation } => Some(tool_invocation),
            Part::Text { .. } => None,
        }
    }

    /// Mutable version of [`Part::as_tool_invocation`].
    #[inline]
    pub fn as_tool_invocation_mut(&mut self) -> Option<&mut ToolInvocation> {
        match self {
            Part::ToolInvocation { tool_invocation } => Some(tool_invocation),
            Part::Text { .. } => None,
        }
    }
}

impl From<ToolInvocation> for Part {
    #[inline]
    fn from(tool_invocation: ToolInvocation) -> Self {
        Part::ToolInvocation { tool_invocation }
    }
}

/// A single tool call and, once available, its result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    /// Identifier assigned by the model.
    pub tool_call_id: String,
    /// Name of the called tool.
    pub tool_name: String,
    /// Arguments as produced by the model.
    #[serde(default)]
    pub args: Value,
    /// Whether the call has been answered.
    #[serde(flatten)]
    pub state: InvocationState,
}

impl ToolInvocation {
    /// Creates an unanswered invocation.
    pub fn call(request: ToolCallRequest) -> Self {
        Self {
            tool_call_id: request.id,
            tool_name: request.name,
            args: request.arguments,
            state: InvocationState::Call,
        }
    }

    /// Returns `true` if the call has no result yet.
    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self.state, InvocationState::Call)
    }

    /// Returns the result, if any.
    #[inline]
    pub fn result(&self) -> Option<&Value> {
        match &self.state {
            InvocationState::Call => None,
            InvocationState::Result { result } => Some(result),
        }
    }

    /// Records the result of the call.
    #[inline]
    pub fn set_result(&mut self, result: Value) {
        self.state = InvocationState::Result { result };
    }
}

/// Lifecycle of a tool invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum InvocationState {
    /// Waiting for a result.
    #[serde(alias = "partial-call")]
    Call,
    /// Answered.
    Result {
        /// The value returned by the tool, or an error payload.
        result: Value,
    },
}

// Clients may omit ids and timestamps, send a bare `content` string, or
// include part types this crate does not know about.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    id: Option<String>,
    role: Role,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    parts: Vec<WirePart>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WirePart {
    Known(Part),
    Unknown(IgnoredAny),
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        let mut parts: Vec<Part> = wire
            .parts
            .into_iter()
            .filter_map(|part| match part {
                WirePart::Known(part) => Some(part),
                WirePart::Unknown(_) => None,
            })
            .collect();
        if parts.is_empty() {
            if let Some(content) = wire.content.filter(|c| !c.is_empty()) {
                parts.push(Part::text(content));
            }
        }
        Self {
            id: wire
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(new_message_id),
            role: wire.role,
            parts,
            created_at: wire.created_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Returns the visible text of a scheduled message, or `None` if `text`
/// was not delivered by the scheduler.
#[inline]
pub fn scheduled_message_text(text: &str) -> Option<&str> {
    text.strip_prefix(SCHEDULED_MESSAGE_PREFIX)
}

/// Renders a tool result the way the model reads it.
pub fn result_to_text(result: &Value) -> String {
    match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Default)]
struct AssistantBlock {
    content: String,
    tool_calls: Vec<ToolCallRequest>,
    results: Vec<ToolCallResult>,
}

impl AssistantBlock {
    fn flush_into(&mut self, out: &mut Vec<ModelMessage>) {
        let block = std::mem::take(self);
        if block.content.is_empty() && block.tool_calls.is_empty() {
            return;
        }
        out.push(ModelMessage::Assistant {
            content: block.content,
            tool_calls: block.tool_calls,
        });
        out.extend(block.results.into_iter().map(ModelMessage::Tool));
    }
}

/// Converts the conversation into the model-facing history.
///
/// Tool invocations still in the `call` state are dropped, so every tool
/// call the model sees is followed by its result. Text that follows a tool
/// result starts a new assistant message.
pub fn to_model_messages(messages: &[Message]) -> Vec<ModelMessage> {
    let mut out = Vec::with_capacity(messages.len());
    for msg in messages {
        match msg.role {
            Role::User => {
                let text = msg.text();
                if !text.is_empty() {
                    out.push(ModelMessage::User(text));
                }
            }
            Role::Assistant => {
                let mut block = AssistantBlock::default();
                for part in &msg.parts {
                    match part {
                        Part::Text { text } => {
                            if !block.results.is_empty() {
                                block.flush_into(&mut out);
                            }
                            block.content.push_str(text);
                        }
                        Part::ToolInvocation { tool_invocation } => {
                            let Some(result) = tool_invocation.result() else {
                                continue;
                            };
                            block.tool_calls.push(ToolCallRequest {
                                id: tool_invocation.tool_call_id.clone(),
                                name: tool_invocation.tool_name.clone(),
                                arguments: tool_invocation.args.clone(),
                            });
                            block.results.push(ToolCallResult {
                                id: tool_invocation.tool_call_id.clone(),
                                content: result_to_text(result),
                            });
                        }
                    }
                }
                block.flush_into(&mut out);
            }
        }
    }
    out
}
