//! The streaming chat endpoint.
//!
//! `GET /chat-public/?session_id=…&country=…&service_type=…&message=…`
//! runs one user turn and streams the event envelope as SSE. The SSE
//! event name is the multiplexer classification (`status` / `final`) for
//! progress frames and the wire `type` for terminal frames. Dropping the
//! connection cancels the in-flight turn.

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_util::stream::Stream;
use serde::Deserialize;
use uuid::Uuid;

use gb_agents::{FrameKind, Multiplexer, TurnRequest};
use gb_domain::cancel::CancelToken;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatParams {
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub country: String,
    pub service_type: String,
    pub message: String,
}

/// Cancels the turn when the SSE stream is dropped mid-flight.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// `GET /chat-public/`
pub async fn chat_public(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Query(params): Query<ChatParams>,
) -> impl IntoResponse {
    if params.message.trim().is_empty() {
        return sse_error("message must not be empty").into_response();
    }

    // Resolve the session: explicit id, active-tuple reuse, or create.
    let owner_id = state.auth.authenticate(&headers);
    let (session, _created) = match state
        .store
        .get_or_create(params.session_id, owner_id, &params.country, &params.service_type)
        .await
    {
        Ok(resolved) => resolved,
        Err(e) => return sse_error(&e.user_message()).into_response(),
    };

    // Serialize turns per session: a second concurrent turn waits here.
    let permit = state.session_locks.acquire(session.session_id).await;

    let cancel = CancelToken::new();
    let rx = state.orchestrator.handle(
        TurnRequest {
            message: params.message,
            session_id: session.session_id,
            country: session.country.clone(),
            service_type: session.service_type.clone(),
        },
        cancel.clone(),
    );

    let stream = turn_sse_stream(rx, CancelOnDrop(cancel), permit);
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn turn_sse_stream(
    mut rx: tokio::sync::mpsc::Receiver<gb_agents::TurnEvent>,
    cancel_guard: CancelOnDrop,
    permit: tokio::sync::OwnedMutexGuard<()>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        // Classification here is deterministic and matches what the
        // orchestrator's own multiplexer decides to persist.
        let mut mux = Multiplexer::new();
        while let Some(event) = rx.recv().await {
            let frame = mux.frame(&event);
            let name = if event.is_terminal() {
                frame.wire["type"].as_str().unwrap_or("status").to_owned()
            } else {
                match frame.kind {
                    FrameKind::Status => "status".to_owned(),
                    FrameKind::Final => "final".to_owned(),
                }
            };
            yield Ok(Event::default().event(name).data(frame.wire.to_string()));
        }
        // Dropping the guard and permit here ends the turn's lock scope;
        // if the client disconnected earlier, the guard's Drop cancels
        // the pipeline instead.
        drop(cancel_guard);
        drop(permit);
    }
}

fn sse_error(message: &str) -> impl IntoResponse {
    let data = serde_json::json!({ "type": "error", "error": "request", "message": message });
    let stream = futures_util::stream::once(async move {
        Ok::<_, std::convert::Infallible>(Event::default().event("error").data(data.to_string()))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
