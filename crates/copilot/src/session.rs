use std::sync::Arc;

use copilot_core::schedule::Scheduler;
use copilot_core::store::{ConversationStore, StoreError};
use copilot_core::tool::Toolset;
use copilot_core::{Agent, AgentBuilder, PendingPolicy};
use copilot_model::ModelProvider;

use crate::scheduler::TokioScheduler;
use crate::tools::*;

/// The system prompt of the copilot.
pub const SYSTEM_PROMPT: &str = include_str!("system_prompt.md");

/// Returns the built-in tools, scheduling through `scheduler`.
pub fn builtin_toolset(scheduler: Arc<dyn Scheduler>) -> Toolset {
    Toolset::new()
        .with(GetLocalTimeTool::new())
        .with(CompareBiomarkersTool::new())
        .with(ScheduleTaskTool::new(scheduler))
}

/// A session builder.
///
/// A session is an agent configured as the copilot: it has the copilot's
/// system prompt and the built-in tools.
pub struct SessionBuilder {
    agent_builder: AgentBuilder,
    toolset: Option<Arc<Toolset>>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(
        provider: M,
    ) -> Self {
        let agent_builder = AgentBuilder::with_model_provider(provider)
            .with_system_prompt(SYSTEM_PROMPT);
        Self {
            agent_builder,
            toolset: None,
            scheduler: None,
        }
    }

    /// Sets the conversation id.
    #[inline]
    pub fn with_id<S: Into<String>>(mut self, id: S) -> Self {
        self.agent_builder = self.agent_builder.with_id(id);
        self
    }

    /// Replaces the default system prompt.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.agent_builder = self.agent_builder.with_system_prompt(prompt);
        self
    }

    /// Sets the maximum number of model requests per turn.
    #[inline]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.agent_builder = self.agent_builder.with_max_steps(max_steps);
        self
    }

    /// Sets how turns treat calls that still wait for a decision.
    #[inline]
    pub fn with_pending_policy(mut self, policy: PendingPolicy) -> Self {
        self.agent_builder = self.agent_builder.with_pending_policy(policy);
        self
    }

    /// Persists the history in `store`.
    #[inline]
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.agent_builder = self.agent_builder.with_store(store);
        self
    }

    /// Sets the scheduler used by the `schedule_task` tool.
    ///
    /// Ignored if a toolset is set with [`Self::with_toolset`].
    #[inline]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Uses `toolset` instead of building the built-in tools.
    ///
    /// Useful to share one toolset between many sessions.
    #[inline]
    pub fn with_toolset(mut self, toolset: Arc<Toolset>) -> Self {
        self.toolset = Some(toolset);
        self
    }

    /// Attaches a callback to be invoked when the agent is idle.
    #[inline]
    pub fn on_idle(
        mut self,
        on_idle: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.agent_builder = self.agent_builder.on_idle(on_idle);
        self
    }

    fn into_agent_builder(self) -> AgentBuilder {
        let toolset = self.toolset.unwrap_or_else(|| {
            let scheduler = self
                .scheduler
                .unwrap_or_else(|| Arc::new(TokioScheduler::new()));
            Arc::new(builtin_toolset(scheduler))
        });
        self.agent_builder.with_toolset(toolset)
    }

    /// Builds a session with an empty history.
    pub fn build(self) -> Agent {
        self.into_agent_builder().build()
    }

    /// Builds a session, restoring its history from the store.
    pub async fn build_restored(self) -> Result<Agent, StoreError> {
        self.into_agent_builder().build_restored().await
    }
}

#[cfg(test)]
mod tests {
    use copilot_core::{ChatEvent, Decision, Decisions, FinishReason};
    use copilot_model::{ModelMessage, ToolCallRequest};
    use copilot_test_model::{PresetEvent, PresetResponse, TestModelProvider};
    use serde_json::json;

    use super::*;

    async fn collect(mut events: copilot_core::ChatEvents) -> Vec<ChatEvent> {
        let mut all = vec![];
        while let Some(event) = events.recv().await {
            all.push(event);
        }
        all
    }

    #[test]
    fn test_builtin_toolset() {
        let toolset = builtin_toolset(Arc::new(TokioScheduler::new()));
        let names: Vec<_> = toolset.names().collect();
        assert_eq!(
            names,
            vec!["compare_biomarkers", "get_local_time", "schedule_task"]
        );
        assert!(toolset.requires_confirmation("schedule_task"));
        assert!(!toolset.requires_confirmation("compare_biomarkers"));
        assert!(!toolset.requires_confirmation("get_local_time"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lab_review_and_reminder() {
        let provider = TestModelProvider::default();
        provider.add_response(PresetResponse::with_events([
            PresetEvent::ToolCall(ToolCallRequest {
                id: "call_labs".to_owned(),
                name: "compare_biomarkers".to_owned(),
                arguments: json!({
                    "biomarkers": [{ "name": "LDL", "value": 131 }]
                }),
            }),
            PresetEvent::ToolCall(ToolCallRequest {
                id: "call_remind".to_owned(),
                name: "schedule_task".to_owned(),
                arguments: json!({
                    "description": "ask about the repeat lipid panel",
                    "delay_seconds": 86400
                }),
            }),
        ]));
        provider.add_response(PresetResponse::with_text(
            "Your LDL is high. I set a reminder for tomorrow.",
        ));
        provider.add_response(PresetResponse::with_text(
            "scheduled message: did you book the lipid panel?",
        ));

        let scheduler = TokioScheduler::new();
        let mut fired = scheduler.subscribe();
        let agent = SessionBuilder::with_model_provider(provider.clone())
            .with_id("labs")
            .with_scheduler(Arc::new(scheduler.clone()))
            .build();

        let events =
            collect(agent.send_message("Here are my labs").unwrap()).await;
        assert!(events.contains(&ChatEvent::AwaitingConfirmation {
            tool_call_ids: vec!["call_remind".to_owned()],
        }));
        assert!(scheduler.list().is_empty());

        // The system prompt and the tools are sent to the model.
        let request = &provider.requests()[0];
        assert!(matches!(
            &request.messages[0],
            ModelMessage::System(prompt) if prompt == SYSTEM_PROMPT
        ));
        assert_eq!(request.tools.len(), 3);

        let decisions =
            Decisions::from([("call_remind".to_owned(), Decision::Approve)]);
        let events = collect(agent.confirm(decisions).unwrap()).await;
        assert_eq!(
            events.last(),
            Some(&ChatEvent::Finished {
                reason: FinishReason::Completed
            })
        );
        let tasks = scheduler.list();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].conversation_id, "labs");

        let fired = fired.recv().await.unwrap();
        collect(fired.events).await;
        let messages = agent.messages().await.unwrap();
        assert_eq!(
            messages.last().unwrap().text(),
            "scheduled message: did you book the lipid panel?"
        );
        assert_eq!(provider.remaining(), 0);
    }
}
