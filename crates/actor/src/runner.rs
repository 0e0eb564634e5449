use crate::Message;
use crate::mailbox::MessageReceiver;

pub(crate) async fn run_actor<S: Send + 'static>(
    mut state: S,
    mut msg_rx: MessageReceiver<S>,
) {
    debug!("started");
    // Every queued message holds a handle, so the receiver yields `None`
    // only once the queue is drained and every handle is gone.
    while let Some((msg, handle)) = msg_rx.recv().await {
        trace!("received message: {msg:?}");

        let proc_span = trace_span!("proc msg");
        proc_span.in_scope(|| {
            msg.handle(&mut state, &handle);
            trace!("finished");
        });
    }
    debug!("will terminate");
}
