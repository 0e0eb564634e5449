use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use copilot_core::schedule::{Scheduler, Trigger};
use copilot_core::tool::{Error as ToolError, Tool, ToolContext, ToolResult};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;

/// Input of [`ScheduleTaskTool`].
#[derive(Deserialize, JsonSchema)]
pub struct ScheduleTaskParameters {
    #[schemars(
        description = "What to do when the task fires, written as an instruction to yourself."
    )]
    description: String,
    #[schemars(description = "Run the task after this many seconds.")]
    #[serde(default)]
    delay_seconds: Option<u64>,
    #[schemars(description = "Run the task at this time, in RFC 3339 format.")]
    #[serde(default)]
    at: Option<DateTime<Utc>>,
    #[schemars(description = "Run the task repeatedly on a cron schedule.")]
    #[serde(default)]
    cron: Option<String>,
}

impl ScheduleTaskParameters {
    fn trigger(&self) -> Result<Trigger, ToolError> {
        let mut triggers = Vec::with_capacity(1);
        if let Some(seconds) = self.delay_seconds {
            triggers.push(Trigger::Delay(Duration::from_secs(seconds)));
        }
        if let Some(at) = self.at {
            triggers.push(Trigger::At(at));
        }
        if let Some(cron) = &self.cron {
            triggers.push(Trigger::Cron(cron.clone()));
        }
        match triggers.len() {
            1 => Ok(triggers.remove(0)),
            _ => Err(ToolError::invalid_input().with_reason(
                "exactly one of `delay_seconds`, `at` or `cron` is required",
            )),
        }
    }
}

/// A tool that schedules a task for the current conversation.
///
/// Every call must be confirmed by the user.
pub struct ScheduleTaskTool {
    scheduler: Arc<dyn Scheduler>,
    parameter_schema: Value,
}

impl ScheduleTaskTool {
    /// Creates a tool that registers tasks with `scheduler`.
    #[inline]
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            parameter_schema: schema_for!(ScheduleTaskParameters).to_value(),
        }
    }
}

impl Tool for ScheduleTaskTool {
    type Input = ScheduleTaskParameters;

    fn name(&self) -> &str {
        "schedule_task"
    }

    fn description(&self) -> &str {
        r#"
Schedule a task to run later in this conversation, such as a reminder to take a medication or to retest a biomarker.
When the task fires you receive its description and reply to the user."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    fn execute(
        &self,
        input: ScheduleTaskParameters,
        ctx: &ToolContext,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let result = schedule(&*self.scheduler, input, ctx);
        async move { result }
    }
}

fn schedule(
    scheduler: &dyn Scheduler,
    input: ScheduleTaskParameters,
    ctx: &ToolContext,
) -> ToolResult {
    let trigger = input.trigger()?;
    let Some(agent) = ctx.agent() else {
        return Err(ToolError::execution_error()
            .with_reason("no agent is running this conversation"));
    };
    let task = scheduler
        .schedule(agent, &input.description, trigger)
        .map_err(|err| {
            ToolError::execution_error().with_reason(err.to_string())
        })?;
    info!(
        "scheduled task {} for conversation {}",
        task.id, task.conversation_id
    );
    serde_json::to_value(&task).map_err(|err| {
        ToolError::execution_error().with_reason(err.to_string())
    })
}
