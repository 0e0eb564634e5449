use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;

use copilot_model::{
    ModelFinishReason, ModelProvider, ModelProviderError, ModelRequest,
    ModelResponse, ModelResponseEvent, ToolCallRequest,
};
use tracing::Instrument;

type SendRequestResult =
    Result<ModelClientResponse, Box<dyn ModelProviderError>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
type DeltaFn = Box<dyn FnMut(&str) + Send + 'static>;
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ModelRequest, DeltaFn) -> BoxedSendRequestFuture + Send + Sync
>;

/// A type-erased wrapper around a model provider, which drains a streamed
/// response into a [`ModelClientResponse`].
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: HandlerFn = Arc::new(move |req, on_delta| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("got a request: {req:?}");
                    let resp_or_err = fut.await;
                    handle_response::<P>(resp_or_err, on_delta).await
                }
                .instrument(debug_span!("model request")),
            )
        });
        Self { handler_fn }
    }

    /// Sends a request and returns the fully received response.
    ///
    /// `on_delta` is called with every piece of text as it streams in.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    #[inline]
    pub async fn send_request(
        &self,
        req: ModelRequest,
        on_delta: impl FnMut(&str) + Send + 'static,
    ) -> SendRequestResult {
        (self.handler_fn)(req, Box::new(on_delta)).await
    }
}

/// A completely received response from the model client.
///
/// The text is only delivered through the delta callback.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelClientResponse {
    /// Tool calls requested by the model, in the order they were received.
    pub tool_calls: Vec<ToolCallRequest>,
    /// The reason the model finished generating, if it said so.
    pub finish_reason: Option<ModelFinishReason>,
}

async fn handle_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
    mut on_delta: DeltaFn,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            error!("model request failed: {err}");
            return Err(Box::new(err));
        }
    };

    let mut response = ModelClientResponse::default();

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(err) => {
                error!("model response failed: {err}");
                return Err(Box::new(err));
            }
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(delta) => {
                on_delta(&delta);
            }
            ModelResponseEvent::ToolCall(req) => {
                response.tool_calls.push(req);
            }
            ModelResponseEvent::Completed(reason) => {
                response.finish_reason = Some(reason);
            }
        }
    }

    trace!("finished a request");
    Ok(response)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use copilot_model::{ErrorKind, ModelMessage};
    use copilot_test_model::{
        PresetError, PresetEvent, PresetResponse, TestModelProvider,
    };
    use serde_json::json;

    use super::*;

    fn request() -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::User("Hi".to_owned())],
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let model_provider = TestModelProvider::default();
        model_provider.add_response(PresetResponse::with_events([
            PresetEvent::MessageDelta("How ".to_owned()),
            PresetEvent::MessageDelta("are ".to_owned()),
            PresetEvent::MessageDelta("you?".to_owned()),
        ]));
        model_provider.add_response(PresetResponse::with_events([
            PresetEvent::ToolCall(ToolCallRequest {
                id: "call_1".to_owned(),
                name: "get_local_time".to_owned(),
                arguments: json!({}),
            }),
        ]));

        let model_client = ModelClient::new(model_provider);

        let deltas = Arc::new(Mutex::new(Vec::<String>::new()));
        let resp = model_client
            .send_request(request(), {
                let deltas = Arc::clone(&deltas);
                move |delta| deltas.lock().unwrap().push(delta.to_owned())
            })
            .await
            .unwrap();
        assert_eq!(resp.finish_reason, Some(ModelFinishReason::Stop));
        assert_eq!(*deltas.lock().unwrap(), vec!["How ", "are ", "you?"]);

        let resp = model_client.send_request(request(), |_| {}).await.unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "get_local_time");
        assert_eq!(resp.finish_reason, Some(ModelFinishReason::ToolCalls));
    }

    #[tokio::test]
    async fn test_error_handling() {
        let model_provider = TestModelProvider::default();
        model_provider.add_response(PresetResponse::with_error(
            PresetError::Unauthorized,
        ));
        let model_client = ModelClient::new(model_provider);

        let err = model_client
            .send_request(request(), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        // The script is exhausted now.
        let result = model_client.send_request(request(), |_| {}).await;
        assert!(result.is_err());
    }
}
