use std::collections::HashMap;
use std::sync::{Arc, Weak};

use copilot_core::Agent;
use copilot_core::schedule::Scheduler;
use copilot_core::store::{ConversationStore, MemoryStore};
use copilot_openai_model::OpenAIProvider;
use tokio::sync::Mutex;

use super::ApiError;
use crate::config::Config;
use crate::session::{SessionBuilder, builtin_toolset};
use crate::store::{FileStore, is_valid_conversation_id};

type SessionFactory = dyn Fn(&str) -> SessionBuilder + Send + Sync;

struct Inner {
    agents: Mutex<HashMap<String, Agent>>,
    sessions: Option<Box<SessionFactory>>,
}

impl Inner {
    /// Drops the agents that nobody uses. Their history is in the store.
    async fn evict_idle(&self) {
        let mut agents = self.agents.lock().await;
        evict_idle(&mut agents);
    }
}

fn evict_idle(agents: &mut HashMap<String, Agent>) {
    let before = agents.len();
    agents.retain(|_, agent| agent.is_in_use());
    let evicted = before - agents.len();
    if evicted > 0 {
        debug!("evicted {evicted} idle agents, {} left", agents.len());
    }
}

/// Shared state of the server: one agent per conversation name.
///
/// Agents are created on first use with a session factory, restoring the
/// history from its store. An agent is dropped once it is idle and no
/// request or scheduled task holds it.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

impl AppState {
    /// Creates a state that builds sessions with `sessions`, which receives
    /// the conversation name.
    pub fn new<F>(sessions: F) -> Self
    where
        F: Fn(&str) -> SessionBuilder + Send + Sync + 'static,
    {
        Self::with_factory(Some(Box::new(sessions)))
    }

    /// Creates a state for a server without a model provider. Every
    /// request is answered with an error.
    pub fn unconfigured() -> Self {
        Self::with_factory(None)
    }

    /// Creates a state serving the OpenAI-compatible provider described by
    /// `config`.
    ///
    /// A missing API key is logged and yields an unconfigured state.
    pub fn from_config(config: &Config, scheduler: Arc<dyn Scheduler>) -> Self {
        let provider_config = match config.provider_config() {
            Ok(provider_config) => provider_config,
            Err(err) => {
                error!("{err}, all requests will fail");
                return Self::unconfigured();
            }
        };
        let provider = OpenAIProvider::new(provider_config);
        let toolset = Arc::new(builtin_toolset(scheduler));
        let store: Arc<dyn ConversationStore> = match &config.data_dir {
            Some(dir) => Arc::new(FileStore::new(dir)),
            None => Arc::new(MemoryStore::new()),
        };
        let max_steps = config.max_steps;
        Self::new(move |name| {
            SessionBuilder::with_model_provider(provider.clone())
                .with_id(name)
                .with_toolset(Arc::clone(&toolset))
                .with_store(Arc::clone(&store))
                .with_max_steps(max_steps)
        })
    }

    fn with_factory(sessions: Option<Box<SessionFactory>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                agents: Mutex::new(HashMap::new()),
                sessions,
            }),
        }
    }

    /// Returns `true` if agents can be created.
    #[inline]
    pub fn is_configured(&self) -> bool {
        self.inner.sessions.is_some()
    }

    /// Returns the agent of conversation `name`, creating it and restoring
    /// its history if needed.
    pub async fn agent(&self, name: &str) -> Result<Agent, ApiError> {
        let sessions =
            self.inner.sessions.as_ref().ok_or(ApiError::MissingApiKey)?;
        if !is_valid_conversation_id(name) {
            return Err(ApiError::InvalidName(name.to_owned()));
        }

        let mut agents = self.inner.agents.lock().await;
        if let Some(agent) = agents.get(name) {
            return Ok(agent.clone());
        }
        evict_idle(&mut agents);

        let inner = Arc::downgrade(&self.inner);
        let agent = sessions(name)
            .on_idle(move || on_idle(&inner))
            .build_restored()
            .await?;
        debug!("created agent {name}");
        agents.insert(name.to_owned(), agent.clone());
        Ok(agent)
    }

    #[cfg(test)]
    pub(crate) async fn agent_count(&self) -> usize {
        self.inner.agents.lock().await.len()
    }
}

fn on_idle(inner: &Weak<Inner>) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    // Runs on the agent's task, which must not wait for the lock.
    tokio::spawn(async move { inner.evict_idle().await });
}
