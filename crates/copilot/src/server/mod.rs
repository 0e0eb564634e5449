//! The HTTP interface.
//!
//! Routes:
//!
//! - `POST /agents/chat/{name}`: runs a turn on the conversation sent by the
//!   client, streaming [`ChatEvent`](copilot_core::ChatEvent)s as
//!   server-sent events.
//! - `GET /agents/chat/{name}/messages`: returns the history.
//! - `DELETE /agents/chat/{name}/messages`: clears the history.
//! - `POST /agents/chat/{name}/tasks`: runs a scheduled task.
//!
//! Anything else is answered with 404.

mod error;
mod handlers;
mod state;
#[cfg(test)]
mod tests;

use std::io;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use handlers::{ChatRequest, TaskRequest};
pub use state::AppState;

/// Creates the router of the server.
pub fn router(state: AppState) -> Router {
    let router = if state.is_configured() {
        Router::new()
            .route("/agents/chat/{name}", post(handlers::chat))
            .route(
                "/agents/chat/{name}/messages",
                get(handlers::messages).delete(handlers::clear_messages),
            )
            .route("/agents/chat/{name}/tasks", post(handlers::execute_task))
            .fallback(handlers::not_found)
    } else {
        Router::new().fallback(handlers::missing_api_key)
    };
    router.with_state(state).layer(TraceLayer::new_for_http())
}

/// Serves requests on `listener` until `shutdown` completes.
pub async fn serve<F>(
    listener: TcpListener,
    state: AppState,
    shutdown: F,
) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("listening on {addr}");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
