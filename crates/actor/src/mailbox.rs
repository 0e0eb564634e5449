use std::fmt::Debug;

use tokio::sync::mpsc;

use crate::{Actor, ActorDeadError};

/// Helper trait for handling boxed messages.
pub trait BoxMessage<S>: Send + Debug + 'static {
    /// Handles the boxed message.
    fn handle_box(self: Box<Self>, state: &mut S, handle: &Actor<S>);
}

/// The message that an actor can handle.
///
/// Handlers run one at a time on the actor's task, so they must not block.
/// Long running work should be spawned, reporting back to the actor with
/// another message.
pub trait Message<S>: BoxMessage<S> {
    /// Handles the message with mutable access to the actor's state.
    fn handle(self, state: &mut S, handle: &Actor<S>);
}

impl<S, M: Message<S>> BoxMessage<S> for M {
    #[inline]
    fn handle_box(self: Box<Self>, state: &mut S, handle: &Actor<S>) {
        (*self).handle(state, handle)
    }
}

impl<S, M: Message<S> + ?Sized> Message<S> for Box<M> {
    #[inline]
    fn handle(self, state: &mut S, handle: &Actor<S>) {
        self.handle_box(state, handle)
    }
}

/// A queued message, with the handle it will be handled with.
///
/// The handle keeps the mailbox open, so a message that made it into the
/// queue is handled even if every other handle is dropped meanwhile.
pub(crate) type Envelope<S> = (Box<dyn Message<S>>, Actor<S>);

pub(crate) type MessageReceiver<S> = mpsc::UnboundedReceiver<Envelope<S>>;

pub(crate) struct Mailbox<S> {
    msg_tx: mpsc::UnboundedSender<Envelope<S>>,
}

impl<S: Send + 'static> Mailbox<S> {
    #[inline]
    pub fn new() -> (Self, MessageReceiver<S>) {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        (Mailbox { msg_tx }, msg_rx)
    }

    #[inline]
    pub fn send(
        &self,
        msg: Box<dyn Message<S>>,
        handle: Actor<S>,
    ) -> Result<(), ActorDeadError> {
        self.msg_tx.send((msg, handle)).map_err(|_| ActorDeadError)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.msg_tx.is_closed()
    }
}
