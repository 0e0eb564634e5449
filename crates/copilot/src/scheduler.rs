//! An in-process scheduler backed by tokio timers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use copilot_core::schedule::{
    ScheduleError, ScheduledTask, Scheduler, Trigger,
};
use copilot_core::{Agent, ChatEvent, ChatEvents};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// A task that fired, with the events of the turn it started.
#[derive(Debug)]
pub struct FiredTask {
    /// The task that fired.
    pub task: ScheduledTask,
    /// Events of the turn running the task.
    pub events: ChatEvents,
}

struct Entry {
    task: ScheduledTask,
    timer: JoinHandle<()>,
}

type Listener = mpsc::UnboundedSender<FiredTask>;

#[derive(Default)]
struct Inner {
    tasks: Mutex<HashMap<String, Entry>>,
    listener: Mutex<Option<Listener>>,
}

impl Inner {
    fn tasks(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.tasks.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn listener(&self) -> MutexGuard<'_, Option<Listener>> {
        self.listener.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn fire(&self, id: &str, agent: &Agent) {
        let Some(entry) = self.tasks().remove(id) else {
            return;
        };
        let task = entry.task;
        info!("running scheduled task {}", task.id);
        let events = match agent.execute_task(&task.description) {
            Ok(events) => events,
            Err(err) => {
                warn!("failed to run scheduled task {}: {err}", task.id);
                return;
            }
        };

        let fired = FiredTask { task, events };
        let fired = match self.listener().as_ref() {
            Some(listener) => match listener.send(fired) {
                Ok(()) => return,
                Err(mpsc::error::SendError(fired)) => fired,
            },
            None => fired,
        };
        // Nobody is watching, the turn still has to be driven to the end.
        tokio::spawn(drain(fired));
    }
}

async fn drain(fired: FiredTask) {
    let FiredTask { task, mut events } = fired;
    while let Some(event) = events.recv().await {
        if let ChatEvent::Error { message } = event {
            warn!("scheduled task {} failed: {message}", task.id);
        }
    }
}

/// A [`Scheduler`] that keeps tasks in memory and fires them with tokio
/// timers.
///
/// One-shot triggers are supported, cron triggers are not. Tasks are lost
/// when the process exits.
///
/// Scheduling must happen inside a tokio runtime.
#[derive(Clone, Default)]
pub struct TokioScheduler {
    inner: Arc<Inner>,
}

impl TokioScheduler {
    /// Creates a scheduler without tasks.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a receiver of the tasks that fire from now on.
    ///
    /// Only the latest subscriber gets them. Without a subscriber, the turns
    /// of fired tasks run unobserved.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<FiredTask> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.listener() = Some(tx);
        rx
    }
}

fn delay_of(trigger: &Trigger) -> Result<Duration, ScheduleError> {
    match trigger {
        Trigger::Delay(delay) => Ok(*delay),
        Trigger::At(at) => (*at - Utc::now())
            .to_std()
            .map_err(|_| ScheduleError::InPast),
        Trigger::Cron(expr) => {
            Err(ScheduleError::UnsupportedTrigger(format!("cron {expr:?}")))
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(
        &self,
        agent: &Agent,
        description: &str,
        trigger: Trigger,
    ) -> Result<ScheduledTask, ScheduleError> {
        let delay = delay_of(&trigger)?;
        let task = ScheduledTask {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: agent.id().to_owned(),
            description: description.to_owned(),
            trigger,
            created_at: Utc::now(),
        };
        debug!("scheduling task {} in {delay:?}", task.id);

        // The entry must be in place before the timer can look it up.
        let mut tasks = self.inner.tasks();
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let agent = agent.clone();
        let id = task.id.clone();
        let timer = tokio::spawn(async move {
            sleep(delay).await;
            if let Some(inner) = inner.upgrade() {
                inner.fire(&id, &agent);
            }
        });
        tasks.insert(
            task.id.clone(),
            Entry {
                task: task.clone(),
                timer,
            },
        );
        Ok(task)
    }

    fn list(&self) -> Vec<ScheduledTask> {
        let mut tasks: Vec<_> = self
            .inner
            .tasks()
            .values()
            .map(|entry| entry.task.clone())
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    fn cancel(&self, id: &str) -> Result<(), ScheduleError> {
        let entry = self
            .inner
            .tasks()
            .remove(id)
            .ok_or_else(|| ScheduleError::NotFound(id.to_owned()))?;
        entry.timer.abort();
        debug!("cancelled task {id}");
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for entry in self.tasks().values() {
            entry.timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use copilot_core::AgentBuilder;
    use copilot_core::conversation::{Role, SCHEDULED_TASK_PREFIX};
    use copilot_test_model::{PresetResponse, TestModelProvider};

    use super::*;

    fn agent(provider: &TestModelProvider) -> Agent {
        AgentBuilder::with_model_provider(provider.clone())
            .with_id("scheduled")
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_fires() {
        let provider = TestModelProvider::default();
        provider.add_response(PresetResponse::with_text(
            "scheduled message: time to take your statin",
        ));
        let agent = agent(&provider);
        let scheduler = TokioScheduler::new();
        let mut fired = scheduler.subscribe();

        let task = scheduler
            .schedule(
                &agent,
                "remind the user to take their statin",
                Trigger::Delay(Duration::from_secs(3600)),
            )
            .unwrap();
        assert_eq!(task.conversation_id, "scheduled");
        assert_eq!(scheduler.list(), vec![task.clone()]);

        let FiredTask {
            task: fired_task,
            mut events,
        } = fired.recv().await.unwrap();
        assert_eq!(fired_task, task);
        assert!(scheduler.list().is_empty());

        let mut last = None;
        while let Some(event) = events.recv().await {
            last = Some(event);
        }
        assert!(matches!(last, Some(ChatEvent::Finished { .. })));

        let messages = agent.messages().await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(
            messages[0].text(),
            format!(
                "{SCHEDULED_TASK_PREFIX}remind the user to take their statin"
            )
        );
        assert_eq!(
            messages[1].text(),
            "scheduled message: time to take your statin"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unobserved_task_runs() {
        let provider = TestModelProvider::default();
        provider.add_response(PresetResponse::with_text("Done."));
        let agent = agent(&provider);
        let scheduler = TokioScheduler::new();

        scheduler
            .schedule(&agent, "check in", Trigger::Delay(Duration::ZERO))
            .unwrap();
        sleep(Duration::from_secs(1)).await;

        // Runs after the scheduled turn in the actor queue.
        assert_eq!(agent.messages().await.unwrap().len(), 2);
        assert_eq!(provider.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let provider = TestModelProvider::default();
        let agent = agent(&provider);
        let scheduler = TokioScheduler::new();

        let trigger = Trigger::Delay(Duration::from_secs(5));
        let task = scheduler.schedule(&agent, "check in", trigger).unwrap();
        scheduler.cancel(&task.id).unwrap();
        assert!(scheduler.list().is_empty());
        assert_eq!(
            scheduler.cancel(&task.id),
            Err(ScheduleError::NotFound(task.id.clone()))
        );

        sleep(Duration::from_secs(10)).await;
        assert!(agent.messages().await.unwrap().is_empty());
        assert_eq!(provider.requests().len(), 0);
    }

    #[tokio::test]
    async fn test_rejected_triggers() {
        let provider = TestModelProvider::default();
        let agent = agent(&provider);
        let scheduler = TokioScheduler::new();

        let past = Utc::now() - chrono::Duration::minutes(1);
        assert_eq!(
            scheduler.schedule(&agent, "too late", Trigger::At(past)),
            Err(ScheduleError::InPast)
        );
        assert!(matches!(
            scheduler.schedule(
                &agent,
                "every morning",
                Trigger::Cron("0 9 * * *".to_owned())
            ),
            Err(ScheduleError::UnsupportedTrigger(_))
        ));
        assert!(scheduler.list().is_empty());
    }
}
