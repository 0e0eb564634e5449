//! Resolution of tool calls that wait for a human decision.
//!
//! Tools that require confirmation are recorded in the conversation as
//! invocations without a result. The client answers each of them with a
//! [`Decision`], and [`resolve_tool_calls`] turns those decisions into
//! results before the conversation goes back to the model.

use std::collections::HashMap;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::Message;
use crate::tool::{Error as ToolError, ToolContext, Toolset};

/// The result recorded for a call the user rejected.
pub const REJECTION_SENTINEL: &str =
    "Error: User denied access to tool execution";

const REJECTION_REASON: &str = "User denied access to tool execution";

/// A human decision about a pending tool call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Run the tool.
    Approve,
    /// Don't run the tool.
    Reject,
}

/// Decisions keyed by tool call id.
pub type Decisions = HashMap<String, Decision>;

/// A call that got a result during resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedCall {
    /// Identifier of the call.
    pub tool_call_id: String,
    /// Name of the called tool.
    pub tool_name: String,
    /// The decision that was applied.
    pub decision: Decision,
    /// The recorded result.
    pub result: Value,
}

/// Output of [`resolve_tool_calls`].
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    /// The conversation with resolved calls rewritten in place.
    pub messages: Vec<Message>,
    /// Calls that were resolved, in document order.
    pub resolved: Vec<ResolvedCall>,
    /// Ids of calls still waiting for a decision, in document order.
    pub pending: Vec<String>,
}

enum Action {
    Reject,
    Approve(usize),
}

/// Applies `decisions` to every unanswered call of a tool that requires
/// confirmation.
///
/// A rejected call gets [`REJECTION_SENTINEL`] as its result and its tool
/// is never invoked. Approved calls run concurrently, each on its own
/// task, and all of them finish before this function returns. A call
/// without a decision is left untouched and reported as pending.
///
/// Calls that already have a result, and calls of tools that don't
/// require confirmation, are never touched, so resolving twice is the same
/// as resolving once.
pub async fn resolve_tool_calls(
    mut messages: Vec<Message>,
    toolset: &Toolset,
    decisions: &Decisions,
    ctx: &ToolContext,
) -> Resolution {
    let mut actions = vec![];
    let mut runs = vec![];
    let mut pending = vec![];

    for (msg_idx, msg) in messages.iter().enumerate() {
        for (part_idx, part) in msg.parts.iter().enumerate() {
            let Some(invocation) = part.as_tool_invocation() else {
                continue;
            };
            if !invocation.is_pending()
                || !toolset.requires_confirmation(&invocation.tool_name)
            {
                continue;
            }
            match decisions.get(&invocation.tool_call_id) {
                Some(Decision::Reject) => {
                    debug!("tool call {} rejected", invocation.tool_call_id);
                    actions.push((msg_idx, part_idx, Action::Reject));
                }
                Some(Decision::Approve) => {
                    debug!("tool call {} approved", invocation.tool_call_id);
                    let run_idx = runs.len();
                    actions.push((msg_idx, part_idx, Action::Approve(run_idx)));
                    runs.push(toolset.run(
                        &invocation.tool_name,
                        invocation.args.clone(),
                        ctx,
                    ));
                }
                None => pending.push(invocation.tool_call_id.clone()),
            }
        }
    }

    let mut outputs: Vec<Option<Value>> =
        join_all(runs).await.into_iter().map(Some).collect();

    let mut resolved = Vec::with_capacity(actions.len());
    for (msg_idx, part_idx, action) in actions {
        let (decision, result) = match action {
            Action::Reject => (
                Decision::Reject,
                ToolError::permission_denied()
                    .with_reason(REJECTION_REASON)
                    .to_payload(),
            ),
            Action::Approve(run_idx) => (
                Decision::Approve,
                outputs[run_idx].take().unwrap_or(Value::Null),
            ),
        };
        let Some(invocation) =
            messages[msg_idx].parts[part_idx].as_tool_invocation_mut()
        else {
            continue;
        };
        invocation.set_result(result.clone());
        resolved.push(ResolvedCall {
            tool_call_id: invocation.tool_call_id.clone(),
            tool_name: invocation.tool_name.clone(),
            decision,
            result,
        });
    }

    Resolution {
        messages,
        resolved,
        pending,
    }
}
