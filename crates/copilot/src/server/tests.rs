use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use copilot_core::conversation::{Message, Part, Role, ToolInvocation};
use copilot_core::store::{ConversationStore, MemoryStore};
use copilot_core::{ChatEvent, FinishReason};
use copilot_model::ToolCallRequest;
use copilot_test_model::{PresetResponse, TestModelProvider};
use serde_json::{Value, json};
use tower::ServiceExt;

use super::*;
use crate::scheduler::TokioScheduler;
use crate::session::{SessionBuilder, builtin_toolset};

fn state(provider: &TestModelProvider, store: Arc<MemoryStore>) -> AppState {
    let provider = provider.clone();
    let toolset = Arc::new(builtin_toolset(Arc::new(TokioScheduler::new())));
    AppState::new(move |name| {
        SessionBuilder::with_model_provider(provider.clone())
            .with_id(name)
            .with_toolset(Arc::clone(&toolset))
            .with_store(store.clone())
    })
}

fn app(provider: &TestModelProvider, store: Arc<MemoryStore>) -> Router {
    router(state(provider, store))
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn sse_events(body: &str) -> Vec<ChatEvent> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect()
}

fn pending_reminder() -> Message {
    let mut message = Message::new(Role::Assistant);
    message.parts.push(Part::from(ToolInvocation::call(ToolCallRequest {
        id: "call_remind".to_owned(),
        name: "schedule_task".to_owned(),
        arguments: json!({
            "description": "ask about the lipid panel",
            "delay_seconds": 60
        }),
    })));
    message
}

#[tokio::test]
async fn test_not_found() {
    let provider = TestModelProvider::default();
    let app = app(&provider, Arc::new(MemoryStore::new()));

    for uri in ["/", "/agents", "/agents/chat/alice/unknown"] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "Not found");
    }
}

#[tokio::test]
async fn test_missing_api_key() {
    let app = router(AppState::unconfigured());

    let response = app
        .clone()
        .oneshot(post_json("/agents/chat/alice", json!({ "messages": [] })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "OPENAI_API_KEY is not set");

    let response = app.oneshot(get("/anything")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_chat_streams_events() {
    let provider = TestModelProvider::default();
    provider.add_response(PresetResponse::with_text("Hello! How can I help?"));
    let store = Arc::new(MemoryStore::new());
    let app = app(&provider, store.clone());

    let body = json!({ "messages": [Message::user("Hi")] });
    let response = app
        .clone()
        .oneshot(post_json("/agents/chat/alice", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );

    let events = sse_events(&body_text(response).await);
    let text: String = events
        .iter()
        .filter_map(|event| match event {
            ChatEvent::TextDelta { delta, .. } => Some(delta.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "Hello! How can I help?");
    assert_eq!(
        events.last(),
        Some(&ChatEvent::Finished {
            reason: FinishReason::Completed
        })
    );

    let response = app
        .oneshot(get("/agents/chat/alice/messages"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let messages: Vec<Message> =
        serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].text(), "Hello! How can I help?");
    assert_eq!(store.load("alice").await.unwrap(), Some(messages));
}

#[tokio::test]
async fn test_chat_holds_pending_calls() {
    let provider = TestModelProvider::default();
    let app = app(&provider, Arc::new(MemoryStore::new()));

    let history = vec![Message::user("Remind me tomorrow"), pending_reminder()];
    let body = json!({ "messages": history });
    let response = app
        .clone()
        .oneshot(post_json("/agents/chat/alice", body))
        .await
        .unwrap();
    let events = sse_events(&body_text(response).await);
    assert_eq!(
        events,
        vec![
            ChatEvent::AwaitingConfirmation {
                tool_call_ids: vec!["call_remind".to_owned()],
            },
            ChatEvent::Finished {
                reason: FinishReason::AwaitingConfirmation
            },
        ]
    );
    assert!(provider.requests().is_empty());

    let response = app
        .oneshot(get("/agents/chat/alice/messages"))
        .await
        .unwrap();
    let messages: Vec<Message> =
        serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(messages, history);
}

#[tokio::test]
async fn test_chat_applies_decisions() {
    let provider = TestModelProvider::default();
    provider.add_response(PresetResponse::with_text("No problem."));
    let app = app(&provider, Arc::new(MemoryStore::new()));

    let body = json!({
        "messages": [Message::user("Remind me tomorrow"), pending_reminder()],
        "decisions": { "call_remind": "reject" }
    });
    let response = app
        .oneshot(post_json("/agents/chat/alice", body))
        .await
        .unwrap();
    let events = sse_events(&body_text(response).await);
    assert!(events.contains(&ChatEvent::ToolResult {
        tool_call_id: "call_remind".to_owned(),
        tool_name: "schedule_task".to_owned(),
        result: json!("Error: User denied access to tool execution"),
    }));
    // The turn ran to the end although the app is gone.
    assert_eq!(
        events.last(),
        Some(&ChatEvent::Finished {
            reason: FinishReason::Completed
        })
    );
    assert_eq!(provider.requests().len(), 1);
}

#[tokio::test]
async fn test_clear_messages() {
    let provider = TestModelProvider::default();
    let store = Arc::new(MemoryStore::new());
    store
        .save("alice", &[Message::user("Hi"), Message::assistant("Hello!")])
        .await
        .unwrap();
    let app = app(&provider, store.clone());

    let response = app
        .clone()
        .oneshot(get("/agents/chat/alice/messages"))
        .await
        .unwrap();
    let messages: Vec<Message> =
        serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(messages.len(), 2);

    let request = Request::builder()
        .method("DELETE")
        .uri("/agents/chat/alice/messages")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(get("/agents/chat/alice/messages"))
        .await
        .unwrap();
    assert_eq!(body_text(response).await, "[]");
    assert!(store.load("alice").await.unwrap().is_none());
}

#[tokio::test]
async fn test_execute_task() {
    let provider = TestModelProvider::default();
    provider.add_response(PresetResponse::with_text(
        "scheduled message: time for your walk",
    ));
    let app = app(&provider, Arc::new(MemoryStore::new()));

    let body = json!({ "description": "remind the user to walk" });
    let response = app
        .clone()
        .oneshot(post_json("/agents/chat/bob/tasks", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let mut messages: Vec<Message> = vec![];
    for _ in 0..100 {
        let response = app
            .clone()
            .oneshot(get("/agents/chat/bob/messages"))
            .await
            .unwrap();
        messages = serde_json::from_str(&body_text(response).await).unwrap();
        if messages.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(messages.len(), 2);
    assert_eq!(
        messages[0].text(),
        "Running scheduled task: remind the user to walk"
    );
    assert_eq!(messages[1].text(), "scheduled message: time for your walk");
}

#[tokio::test]
async fn test_invalid_name() {
    let provider = TestModelProvider::default();
    let app = app(&provider, Arc::new(MemoryStore::new()));

    let response = app
        .oneshot(get("/agents/chat/not.valid/messages"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_idle_agents_are_evicted() {
    let provider = TestModelProvider::default();
    provider.add_response(PresetResponse::with_text("Hello!"));
    let state = state(&provider, Arc::new(MemoryStore::new()));
    let app = router(state.clone());

    let body = json!({ "messages": [Message::user("Hi")] });
    let response = app
        .clone()
        .oneshot(post_json("/agents/chat/alice", body))
        .await
        .unwrap();
    body_text(response).await;

    for _ in 0..100 {
        if state.agent_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state.agent_count().await, 0);

    // The next request restores the history from the store.
    let response = app
        .oneshot(get("/agents/chat/alice/messages"))
        .await
        .unwrap();
    let messages: Vec<Message> =
        serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].text(), "Hello!");
}
