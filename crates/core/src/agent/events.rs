use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Something that happened while a turn was running.
///
/// Events of one turn are delivered in order, and the last one is always
/// [`ChatEvent::Finished`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChatEvent {
    /// A piece of assistant text.
    #[serde(rename_all = "camelCase")]
    TextDelta {
        /// The assistant message the text belongs to.
        message_id: String,
        /// The new text.
        delta: String,
    },
    /// The model requested a tool call.
    #[serde(rename_all = "camelCase")]
    ToolCall {
        /// The assistant message the call belongs to.
        message_id: String,
        /// Identifier of the call.
        tool_call_id: String,
        /// Name of the tool.
        tool_name: String,
        /// Arguments of the call.
        args: Value,
        /// Whether the call waits for a human decision.
        requires_confirmation: bool,
    },
    /// A tool call got its result.
    #[serde(rename_all = "camelCase")]
    ToolResult {
        /// Identifier of the call.
        tool_call_id: String,
        /// Name of the tool.
        tool_name: String,
        /// The recorded result.
        result: Value,
    },
    /// The turn stopped because some calls need a decision.
    #[serde(rename_all = "camelCase")]
    AwaitingConfirmation {
        /// Ids of the calls waiting for a decision.
        tool_call_ids: Vec<String>,
    },
    /// Something went wrong. The turn ends right after.
    Error {
        /// A description of the error.
        message: String,
    },
    /// The turn is over and the history has been saved.
    Finished {
        /// Why the turn ended.
        reason: FinishReason,
    },
}

/// Why a turn ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model answered without further tool calls.
    Completed,
    /// Some tool calls wait for a decision.
    AwaitingConfirmation,
    /// The model kept calling tools until the step limit.
    StepLimit,
    /// The history was cleared.
    Cleared,
    /// The model request failed.
    Failed,
}

/// How a turn treats tool calls that still wait for a decision.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PendingPolicy {
    /// Report the pending calls and don't call the model.
    #[default]
    Hold,
    /// Call the model anyway, leaving the pending calls out of what it
    /// sees.
    Omit,
}
