use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use copilot_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
};
use pin_project_lite::pin_project;

use crate::Error;
use crate::io::Sse;
use crate::proto::{self, ChatCompletionChunk, ToolCall};

struct PartialState {
    sse: Sse,
    id: Option<String>,
    tool_calls: Vec<ToolCall>,
    // Complete events waiting to be returned. Tool calls are only queued
    // once the stream says they are complete, since their arguments are
    // streamed in fragments.
    pending_events: VecDeque<ModelResponseEvent>,
    finished: bool,
}

impl PartialState {
    fn finish(&mut self, reason: Option<ModelFinishReason>) {
        if self.finished {
            return;
        }
        self.finished = true;
        for tool_call in self.tool_calls.drain(..) {
            self.pending_events
                .push_back(ModelResponseEvent::ToolCall(tool_call.to_request()));
        }
        if let Some(reason) = reason {
            self.pending_events
                .push_back(ModelResponseEvent::Completed(reason));
        }
    }
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    /// A streamed chat completion, read as server-sent events.
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
    }
}

impl OpenAIResponse {
    /// Creates a response that reads its events from `sse`.
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            tool_calls: Default::default(),
            pending_events: Default::default(),
            finished: false,
        };
        let next_event_fut = async move { next_event(partial_state).await };
        Self {
            next_event_fut: Some(Box::pin(next_event_fut)),
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        let next_event_fut = async move { next_event(partial_state).await };
        *this.next_event_fut = Some(Box::pin(next_event_fut));

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(mut partial_state: PartialState) -> NextEvent {
    loop {
        if let Some(event) = partial_state.pending_events.pop_front() {
            return Ok((Some(event), partial_state));
        }
        if partial_state.finished {
            return Ok((None, partial_state));
        }

        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                // Some servers close the stream without a finish reason.
                partial_state.finish(None);
                continue;
            }
            Err(err) => {
                return Err(Error::new(err.to_string(), ErrorKind::Other));
            }
        };
        trace!("got sse event: {sse_event}");
        if sse_event == "[DONE]" {
            partial_state.finish(None);
            continue;
        }

        let chunk = serde_json::from_str::<ChatCompletionChunk>(&sse_event)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
        if partial_state.id.get_or_insert_with(|| chunk.id.clone()) != &chunk.id
        {
            return Err(Error::new("chunk id mismatch", ErrorKind::Other));
        };

        // Usage-only chunks come without choices.
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    partial_state
                        .pending_events
                        .push_back(ModelResponseEvent::MessageDelta(content));
                }
            }
            for tool_call in choice.delta.tool_calls.into_iter().flatten() {
                let partial_tool_call = partial_state
                    .tool_calls
                    .iter_mut()
                    .find(|t| t.index == tool_call.index);
                match partial_tool_call {
                    Some(partial_tool_call) => partial_tool_call.merge(tool_call),
                    None => partial_state.tool_calls.push(tool_call),
                }
            }
            if let Some(finish_reason) = choice.finish_reason {
                let reason = proto::parse_finish_reason(&finish_reason);
                if reason == ModelFinishReason::ContentFilter {
                    return Err(Error::new(
                        "the response was stopped by the content filter",
                        ErrorKind::Moderated,
                    ));
                }
                partial_state.finish(Some(reason));
            }
        }
    }
}
