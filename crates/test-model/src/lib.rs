//! A local fake model for testing purpose.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use copilot_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    events: VecDeque<ModelResponseEvent>,
    error: Option<ErrorKind>,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl TestModelResponse {
    fn from_preset(preset: PresetResponse, delay: Duration) -> Self {
        let finish_reason = if preset.has_tool_call() {
            ModelFinishReason::ToolCalls
        } else {
            ModelFinishReason::Stop
        };
        let mut events: VecDeque<_> = preset
            .events
            .into_iter()
            .map(|event| match event {
                PresetEvent::MessageDelta(delta) => {
                    ModelResponseEvent::MessageDelta(delta)
                }
                PresetEvent::ToolCall(req) => ModelResponseEvent::ToolCall(req),
            })
            .collect();
        let error = preset.error.map(ErrorKind::from);
        if error.is_none() {
            events.push_back(ModelResponseEvent::Completed(finish_reason));
        }
        Self {
            events,
            error,
            delay,
            sleep: None,
        }
    }
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        if this.events.is_empty() {
            if let Some(kind) = this.error.take() {
                return Poll::Ready(Err(Error {
                    message: "preset failure",
                    kind,
                }));
            }
            // In case this method is called after completion.
            return Poll::Ready(Ok(None));
        }
        let delay = this.delay;
        let sleep = this.sleep.get_or_insert_with(|| Box::pin(sleep(delay)));
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;
        Poll::Ready(Ok(this.events.pop_front()))
    }
}

#[derive(Default)]
struct Script {
    responses: VecDeque<PresetResponse>,
    requests: Vec<ModelRequest>,
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to set up the script, which is the
/// sequence of responses the model gives to consecutive requests. Every
/// request consumes one response, and is recorded so that tests can
/// inspect what the model was actually asked. Once the script runs out,
/// requests fail.
///
/// Clones share the same script.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    script: Arc<Mutex<Script>>,
    delay: Option<Duration>,
}

impl TestModelProvider {
    /// Appends a response to the script.
    #[inline]
    pub fn add_response(&self, preset: PresetResponse) {
        self.lock().responses.push_back(preset);
    }

    /// Sets the delay between two events.
    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns all requests received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.lock().requests.clone()
    }

    /// Returns how many scripted responses are not consumed yet.
    pub fn remaining(&self) -> usize {
        self.lock().responses.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        // A test that panicked while holding the lock has failed anyway.
        self.script.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let mut script = self.lock();
        script.requests.push(req.clone());
        let result = match script.responses.pop_front() {
            None => Err(Error {
                message: "no enough responses",
                kind: ErrorKind::RateLimitExceeded,
            }),
            Some(PresetResponse {
                events,
                error: Some(error),
            }) if events.is_empty() => Err(Error {
                message: "preset failure",
                kind: error.into(),
            }),
            Some(preset) => Ok(TestModelResponse::from_preset(
                preset,
                self.delay.unwrap_or(Duration::from_millis(1)),
            )),
        };
        ready(result)
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use copilot_model::{ModelMessage, ModelTool, ToolCallRequest};
    use serde_json::json;

    use super::*;

    async fn collect_response(
        resp: TestModelResponse,
    ) -> (String, Option<ToolCallRequest>, ModelFinishReason) {
        let mut resp = pin!(resp);
        let mut msg = String::new();
        let mut tool_call = None;
        loop {
            let event = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
                .await
                .unwrap()
                .unwrap();
            match event {
                ModelResponseEvent::Completed(reason) => {
                    return (msg, tool_call, reason);
                }
                ModelResponseEvent::MessageDelta(delta) => {
                    msg.push_str(&delta);
                }
                ModelResponseEvent::ToolCall(req) => tool_call = Some(req),
            }
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let provider = TestModelProvider::default();
        provider.add_response(PresetResponse::with_events([
            PresetEvent::MessageDelta("Hello, ".to_owned()),
            PresetEvent::MessageDelta("world!".to_owned()),
        ]));
        provider.add_response(PresetResponse::with_events([
            PresetEvent::MessageDelta("Let me check the time.".to_owned()),
            PresetEvent::ToolCall(ToolCallRequest {
                id: "tool:1".to_owned(),
                name: "get_local_time".to_owned(),
                arguments: json!({ "location": "Berlin" }),
            }),
        ]));

        let mut req = ModelRequest {
            messages: vec![ModelMessage::User("Hi".to_owned())],
            tools: vec![ModelTool {
                name: "get_local_time".to_owned(),
                description: "Gets the local time".to_owned(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "location": { "type": "string" }
                    }
                }),
            }],
        };
        let resp = provider.send_request(&req).await.unwrap();
        let (msg, tool_call, reason) = collect_response(resp).await;
        assert_eq!(msg, "Hello, world!");
        assert!(tool_call.is_none());
        assert_eq!(reason, ModelFinishReason::Stop);

        req.messages.push(ModelMessage::assistant(msg));
        req.messages
            .push(ModelMessage::User("What time is it?".to_owned()));
        let resp = provider.send_request(&req).await.unwrap();
        let (msg, tool_call, reason) = collect_response(resp).await;
        assert_eq!(msg, "Let me check the time.");
        assert_eq!(tool_call.unwrap().name, "get_local_time");
        assert_eq!(reason, ModelFinishReason::ToolCalls);

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 3);
        assert_eq!(provider.remaining(), 0);
    }

    #[tokio::test]
    async fn test_script_errors() {
        let provider = TestModelProvider::default();
        provider.add_response(PresetResponse::with_error(PresetError::Moderated));

        let req = ModelRequest::default();
        let err = provider.send_request(&req).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Moderated);

        let err = provider.send_request(&req).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        assert_eq!(provider.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_interrupted_response() {
        let provider = TestModelProvider::default();
        provider.add_response(PresetResponse::interrupted(
            [PresetEvent::MessageDelta("Your glucose ".to_owned())],
            PresetError::Other,
        ));

        let resp = provider.send_request(&ModelRequest::default()).await;
        let mut resp = pin!(resp.unwrap());
        let event = poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await;
        assert!(matches!(
            event,
            Ok(Some(ModelResponseEvent::MessageDelta(delta)))
                if delta == "Your glucose "
        ));
        let event = poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await;
        assert_eq!(event.err().unwrap().kind(), ErrorKind::Other);
        let event = poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await;
        assert!(matches!(event, Ok(None)));
    }
}
