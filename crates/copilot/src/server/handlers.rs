use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use copilot_core::conversation::Message;
use copilot_core::{ChatEvent, Decisions};
use serde::Deserialize;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt as _};

use super::{ApiError, AppState};

/// Body of a chat request.
#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    /// The whole conversation as the client sees it.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Decisions for the tool calls waiting for confirmation, keyed by call
    /// id.
    #[serde(default)]
    pub decisions: Decisions,
}

/// Body of a task request.
#[derive(Debug, Deserialize)]
pub struct TaskRequest {
    /// What the agent should do.
    pub description: String,
}

pub async fn chat(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let agent = state.agent(&name).await?;
    let events = agent.chat(request.messages, request.decisions)?;
    let stream = UnboundedReceiverStream::new(events)
        .map(|event: ChatEvent| Event::default().json_data(event));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn messages(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let agent = state.agent(&name).await?;
    Ok(Json(agent.messages().await?))
}

pub async fn clear_messages(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let agent = state.agent(&name).await?;
    agent.clear_history().await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn execute_task(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<TaskRequest>,
) -> Result<StatusCode, ApiError> {
    let agent = state.agent(&name).await?;
    let mut events = agent.execute_task(&request.description)?;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let ChatEvent::Error { message } = event {
                warn!("task for {name} failed: {message}");
            }
        }
    });
    Ok(StatusCode::ACCEPTED)
}

pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}

pub async fn missing_api_key() -> ApiError {
    ApiError::MissingApiKey
}
