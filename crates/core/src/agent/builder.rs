use std::sync::Arc;

use copilot_actor::Actor;
use copilot_model::ModelProvider;

use super::state::AgentState;
use super::{Agent, PendingPolicy};
use crate::conversation::Message;
use crate::model_client::ModelClient;
use crate::store::{ConversationStore, StoreError};
use crate::tool::{Tool, Toolset};

/// The number of model requests a turn may make by default.
pub const DEFAULT_MAX_STEPS: usize = 10;

/// [`Agent`] builder.
pub struct AgentBuilder {
    model_client: ModelClient,
    id: Option<String>,
    system_prompt: Option<String>,
    toolset: Arc<Toolset>,
    max_steps: usize,
    pending_policy: PendingPolicy,
    store: Option<Arc<dyn ConversationStore>>,
    history: Vec<Message>,
    on_idle: Option<Box<dyn Fn() + Send + Sync>>,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            id: None,
            system_prompt: None,
            toolset: Default::default(),
            max_steps: DEFAULT_MAX_STEPS,
            pending_policy: PendingPolicy::default(),
            store: None,
            history: vec![],
            on_idle: None,
        }
    }

    /// Sets the conversation id. A random one is used otherwise.
    #[inline]
    pub fn with_id<S: Into<String>>(mut self, id: S) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the system prompt sent ahead of the history.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        Arc::make_mut(&mut self.toolset).add(tool);
        self
    }

    /// Uses a shared toolset, replacing the tools registered so far.
    #[inline]
    pub fn with_toolset(mut self, toolset: Arc<Toolset>) -> Self {
        self.toolset = toolset;
        self
    }

    /// Sets how many model requests a turn may make.
    #[inline]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Sets how turns treat tool calls still waiting for a decision.
    #[inline]
    pub fn with_pending_policy(mut self, policy: PendingPolicy) -> Self {
        self.pending_policy = policy;
        self
    }

    /// Saves the history to `store` at the end of every turn.
    #[inline]
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attaches a callback to be invoked when the agent is idle.
    #[inline]
    pub fn on_idle(
        mut self,
        on_idle: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.on_idle = Some(Box::new(on_idle));
        self
    }

    /// Builds the agent.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn build(self) -> Agent {
        let id: Arc<str> = match self.id {
            Some(id) => id.into(),
            None => uuid::Uuid::new_v4().simple().to_string().into(),
        };
        let state = AgentState::new(
            Arc::clone(&id),
            self.history,
            self.model_client,
            self.toolset,
            self.system_prompt,
            self.max_steps,
            self.pending_policy,
            self.store,
            self.on_idle,
        );
        let handle = Actor::spawn(state, Some("agent"));
        Agent { id, handle }
    }

    /// Loads the history saved in the store, if any, and builds the agent.
    pub async fn build_restored(mut self) -> Result<Agent, StoreError> {
        if let (Some(store), Some(id)) = (&self.store, &self.id) {
            if let Some(history) = store.load(id).await? {
                debug!("restored {} messages of {id}", history.len());
                self.history = history;
            }
        }
        Ok(self.build())
    }
}
