//! A lightweight actor runtime on top of Tokio.
//!
//! An actor owns its state and handles messages one by one on a dedicated
//! task. Other tasks talk to it through cloneable [`Actor`] handles.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod error;
mod handle;
mod mailbox;
mod runner;

pub use error::ActorDeadError;
pub use handle::Actor;
pub use mailbox::{BoxMessage, Message};

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::*;

    #[derive(Default)]
    struct Counter {
        value: u32,
        history: Vec<u32>,
    }

    #[derive(Debug)]
    struct Add(u32);

    impl Message<Counter> for Add {
        fn handle(self, state: &mut Counter, _handle: &Actor<Counter>) {
            state.value += self.0;
            state.history.push(self.0);
        }
    }

    #[derive(Debug)]
    struct AddLater(u32);

    impl Message<Counter> for AddLater {
        fn handle(self, _state: &mut Counter, handle: &Actor<Counter>) {
            let handle = handle.clone();
            let amount = self.0;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                handle.send(Add(amount)).ok();
            });
        }
    }

    #[derive(Debug)]
    struct Report(oneshot::Sender<Vec<u32>>);

    impl Message<Counter> for Report {
        fn handle(self, state: &mut Counter, _handle: &Actor<Counter>) {
            self.0.send(state.history.clone()).ok();
        }
    }

    #[derive(Debug)]
    struct Crash;

    impl Message<Counter> for Crash {
        fn handle(self, _state: &mut Counter, _handle: &Actor<Counter>) {
            panic!("crash requested");
        }
    }

    #[tokio::test]
    async fn test_send_and_call() {
        let actor = Actor::spawn(Counter::default(), Some("counter"));
        actor.send(Add(40)).unwrap();
        actor.send(Add(2)).unwrap();

        let value = actor.call(|state, _| state.value).await.unwrap();
        assert_eq!(value, 42);
        let history = actor.call(|state, _| state.history.clone()).await;
        assert_eq!(history, Ok(vec![40, 2]));
    }

    #[tokio::test]
    async fn test_handle_reenters_actor() {
        let actor = Actor::spawn(Counter::default(), None);
        actor.send(AddLater(7)).unwrap();
        actor.send(Add(1)).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let history = actor.call(|state, _| state.history.clone()).await;
        assert_eq!(history, Ok(vec![1, 7]));
    }

    #[tokio::test]
    async fn test_queued_messages_outlive_handles() {
        let actor = Actor::spawn(Counter::default(), None);
        let (report_tx, report_rx) = oneshot::channel();
        actor.send(Add(3)).unwrap();
        actor.send(Report(report_tx)).unwrap();
        // The actor task hasn't run yet when its last handle goes away.
        drop(actor);

        assert_eq!(report_rx.await, Ok(vec![3]));
    }

    #[tokio::test]
    async fn test_handle_count() {
        let actor = Actor::spawn(Counter::default(), None);
        assert_eq!(actor.handle_count(), 1);

        let other = actor.clone();
        assert_eq!(actor.handle_count(), 2);
        drop(other);

        actor.send(Add(1)).unwrap();
        assert_eq!(actor.handle_count(), 2);
        actor.call(|_, _| ()).await.unwrap();
        assert_eq!(actor.handle_count(), 1);
    }

    #[tokio::test]
    async fn test_dead_actor() {
        let actor = Actor::spawn(Counter::default(), None);
        actor.send(Crash).unwrap();

        let result = actor.call(|state, _| state.value).await;
        assert_eq!(result, Err(ActorDeadError));
        assert!(actor.is_dead());
        assert_eq!(actor.send(Add(1)), Err(ActorDeadError));
    }
}
