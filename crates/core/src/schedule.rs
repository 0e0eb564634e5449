//! Interface to the scheduling subsystem.
//!
//! A scheduled task is a description that is handed back to the agent of
//! its conversation when the trigger fires, see [`Agent::execute_task`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Agent;

/// When a task should fire.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// After the given delay.
    Delay(Duration),
    /// At the given time.
    At(DateTime<Utc>),
    /// Repeatedly, following a cron expression.
    Cron(String),
}

/// A task registered with a [`Scheduler`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Identifier assigned by the scheduler.
    pub id: String,
    /// The conversation the task reports back to.
    pub conversation_id: String,
    /// What the agent should do when the task fires.
    pub description: String,
    /// When the task fires.
    pub trigger: Trigger,
    /// When the task was scheduled.
    pub created_at: DateTime<Utc>,
}

/// Errors returned by a [`Scheduler`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    /// The scheduler can't handle this kind of trigger.
    #[error("unsupported trigger: {0}")]
    UnsupportedTrigger(String),
    /// The requested time has already passed.
    #[error("the requested time is in the past")]
    InPast,
    /// No task with this id exists.
    #[error("no scheduled task with id {0:?}")]
    NotFound(String),
}

/// Runs tasks at a later time on behalf of an agent.
pub trait Scheduler: Send + Sync + 'static {
    /// Registers a task that calls [`Agent::execute_task`] with
    /// `description` when `trigger` fires.
    fn schedule(
        &self,
        agent: &Agent,
        description: &str,
        trigger: Trigger,
    ) -> Result<ScheduledTask, ScheduleError>;

    /// Returns the tasks that have not fired yet.
    fn list(&self) -> Vec<ScheduledTask>;

    /// Cancels a task that has not fired yet.
    fn cancel(&self, id: &str) -> Result<(), ScheduleError>;
}
