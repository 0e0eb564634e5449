//! Tool call supports.

mod error;
mod object;
mod toolset;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::Agent;
pub use error::{Error, ErrorKind};
pub use toolset::Toolset;

/// The result of a tool call.
///
/// Successful values are stored as-is in the conversation. Errors are
/// stored as an `"Error: ..."` string, see [`Error::to_payload`].
pub type ToolResult = Result<Value, Error>;

/// A tool that can be called by the model.
///
/// Implementations of this trait should be stateless. Whatever a tool needs
/// to know about the conversation it runs in is passed explicitly through
/// the [`ToolContext`].
pub trait Tool: Send + Sync + 'static {
    /// The type of input that the tool accepts.
    type Input: DeserializeOwned;

    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    fn parameter_schema(&self) -> &Value;

    /// Returns `true` if a human must approve each call before it runs.
    ///
    /// Calls to such tools are recorded without a result, and executed
    /// only after an `approve` decision arrives for their call id.
    fn requires_confirmation(&self) -> bool {
        false
    }

    /// Executes the tool with the given input.
    ///
    /// This method must return a future that is fully independent of `self`
    /// and `ctx`. The future runs on its own task.
    fn execute(
        &self,
        input: Self::Input,
        ctx: &ToolContext,
    ) -> impl Future<Output = ToolResult> + Send + 'static;
}

/// Information about the conversation a tool is called from.
#[derive(Clone, Debug)]
pub struct ToolContext {
    conversation_id: String,
    agent: Option<Agent>,
}

impl ToolContext {
    /// Creates a context that is not bound to a running agent.
    #[inline]
    pub fn detached<S: Into<String>>(conversation_id: S) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            agent: None,
        }
    }

    #[inline]
    pub(crate) fn for_agent(agent: Agent) -> Self {
        Self {
            conversation_id: agent.id().to_owned(),
            agent: Some(agent),
        }
    }

    /// Returns the id of the conversation.
    #[inline]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Returns the agent that owns the conversation, if any.
    #[inline]
    pub fn agent(&self) -> Option<&Agent> {
        self.agent.as_ref()
    }
}
