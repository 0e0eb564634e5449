use std::fmt::{self, Debug};
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::Instrument;

use crate::mailbox::Mailbox;
use crate::runner::run_actor;
use crate::{ActorDeadError, Message};

/// Handle to an actor.
///
/// Handles are cheap to clone. The actor keeps running as long as at least
/// one handle is alive or a message is still waiting in its queue.
pub struct Actor<S> {
    mailbox: Arc<Mailbox<S>>,
}

impl<S: Send + 'static> Actor<S> {
    /// Spawns a new actor with the specified state and an optional label.
    ///
    /// The label is attached to the tracing span of the actor task.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn spawn(state: S, label: Option<&str>) -> Self {
        let (mailbox, msg_rx) = Mailbox::new();
        tokio::spawn(
            run_actor(state, msg_rx)
                .instrument(trace_span!("actor", label = label)),
        );
        Self {
            mailbox: Arc::new(mailbox),
        }
    }

    /// Sends a message to the actor.
    #[inline]
    pub fn send<M: Message<S> + 'static>(
        &self,
        msg: M,
    ) -> Result<(), ActorDeadError> {
        self.mailbox.send(Box::new(msg), self.clone())
    }

    /// Runs `f` on the actor's task and waits for its return value.
    ///
    /// The closure sees the state after every message sent before this
    /// call has been handled.
    pub async fn call<F, R>(&self, f: F) -> Result<R, ActorDeadError>
    where
        F: FnOnce(&mut S, &Actor<S>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Call {
            f: Box::new(f),
            reply_tx,
        })?;
        reply_rx.await.map_err(|_| ActorDeadError)
    }

    /// Returns the number of live handles to the actor, counting the ones
    /// held by queued messages.
    #[inline]
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.mailbox)
    }

    /// Returns whether the actor has stopped.
    #[inline]
    pub fn is_dead(&self) -> bool {
        self.mailbox.is_closed()
    }
}

impl<S> Clone for Actor<S> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            mailbox: Arc::clone(&self.mailbox),
        }
    }
}

impl<S> Debug for Actor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor").finish_non_exhaustive()
    }
}

type CallFn<S, R> = Box<dyn FnOnce(&mut S, &Actor<S>) -> R + Send>;

struct Call<S, R> {
    f: CallFn<S, R>,
    reply_tx: oneshot::Sender<R>,
}

impl<S, R> Debug for Call<S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call").finish_non_exhaustive()
    }
}

impl<S: Send + 'static, R: Send + 'static> Message<S> for Call<S, R> {
    fn handle(self, state: &mut S, handle: &Actor<S>) {
        let result = (self.f)(state, handle);
        // The caller may have given up waiting.
        self.reply_tx.send(result).ok();
    }
}
