//! Session-flow endpoints: landing, country selection, proceed-to-chat,
//! the chat page payload, the sidebar listing, suggestions and health.
//!
//! UI chrome is rendered elsewhere; these handlers return the data the
//! frontend binds, plus the redirects that drive the session flow.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use gb_domain::cancel::CancelToken;
use gb_domain::error::Error;

use crate::state::AppState;

/// `GET /` routes to login or the country picker.
pub async fn root(State(state): State<AppState>, headers: HeaderMap) -> Redirect {
    if state.auth.authenticate(&headers).is_some() {
        Redirect::to("/country/")
    } else {
        Redirect::to("/login")
    }
}

/// `GET /login` serves the minimal login form for the dev flow.
pub async fn login_page() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html><body>
<form method="post" action="/login">
  <input name="email" type="email" placeholder="email" required>
  <input name="password" type="password" placeholder="password" required>
  <button type="submit">Sign in</button>
</form>
</body></html>"#,
    )
}

/// `GET /country/` returns the allowed dropdown values.
pub async fn country_selection(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "countries": state.config.chat.countries,
        "service_types": state.config.chat.service_types,
    }))
}

/// Accepted via either the query string or the form body (the form wins
/// field-by-field when both are present).
#[derive(Debug, Default, Deserialize)]
pub struct ProceedParams {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub service_type: Option<String>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
}

/// `POST /proceed-to-chat` resolves (or creates) the session for the
/// tuple and redirects into the chat. Two identical submissions land on
/// the same session.
pub async fn proceed_to_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ProceedParams>,
    form: Option<axum::extract::Form<ProceedParams>>,
) -> Response {
    let form = form.map(|f| f.0).unwrap_or_default();
    let Some(country) = form.country.or(query.country) else {
        return bad_request("country is required".into());
    };
    let Some(service_type) = form.service_type.or(query.service_type) else {
        return bad_request("service_type is required".into());
    };
    let session_id = form.session_id.or(query.session_id);

    if !state.config.chat.countries.contains(&country) {
        return bad_request(format!("unknown country \"{country}\""));
    }
    if !state.config.chat.service_types.contains(&service_type) {
        return bad_request(format!("unknown service type \"{service_type}\""));
    }

    let owner_id = state.auth.authenticate(&headers);
    match state
        .store
        .get_or_create(session_id, owner_id, &country, &service_type)
        .await
    {
        Ok((session, created)) => {
            if created {
                tracing::info!(session_id = %session.session_id, "new chat session");
            } else {
                tracing::debug!(session_id = %session.session_id, "reusing chat session");
            }
            Redirect::to(&format!("/chat/?session_id={}", session.session_id)).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatPageParams {
    pub session_id: Uuid,
}

/// `GET /chat/` returns the session header and full history. Requires auth;
/// 404 for unknown sessions, 403 for someone else's.
pub async fn chat_page(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ChatPageParams>,
) -> Response {
    let Some(owner_id) = state.auth.authenticate(&headers) else {
        return unauthorized();
    };

    let session = match state.store.get(params.session_id).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };
    if let Some(session_owner) = session.owner_id {
        if session_owner != owner_id {
            return error_response(Error::Forbidden(format!("session {}", params.session_id)));
        }
    }

    if let Err(e) = state.store.touch(params.session_id).await {
        tracing::warn!(error = %e, "failed to touch session");
    }

    let history = match state.store.history(params.session_id, 200).await {
        Ok(history) => history,
        Err(e) => return error_response(e),
    };

    Json(serde_json::json!({
        "session": session,
        "history": history,
    }))
    .into_response()
}

/// `GET /sessions` returns the sidebar listing, most recently active first.
pub async fn list_sessions(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(owner_id) = state.auth.authenticate(&headers) else {
        return unauthorized();
    };
    match state.store.list_for_owner(owner_id, true).await {
        Ok(sessions) => Json(serde_json::json!({ "sessions": sessions })).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SuggestionParams {
    pub session_id: Uuid,
}

/// `GET /suggestions` returns three contextual search suggestions.
pub async fn suggestions(
    State(state): State<AppState>,
    Query(params): Query<SuggestionParams>,
) -> Response {
    let session = match state.store.get(params.session_id).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };
    let recent: Vec<(String, String)> = match state.store.history_as_turns(params.session_id).await
    {
        Ok(turns) => turns
            .into_iter()
            .map(|(u, a)| (u.content, a.content))
            .collect(),
        Err(_) => Vec::new(),
    };

    let suggestions = gb_agents::suggestions::generate(
        &state.llm,
        &session.country,
        &session.service_type,
        &recent,
        &CancelToken::new(),
    )
    .await;

    Json(serde_json::json!({ "suggestions": suggestions })).into_response()
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let profiles = state.retriever.count_total().await.ok();
    Json(serde_json::json!({
        "status": "ok",
        "service": "growbal-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "profiles_indexed": profiles,
    }))
}

// ── Response helpers ───────────────────────────────────────────────

fn bad_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "authentication required" })),
    )
        .into_response()
}

/// Map domain errors to HTTP statuses; nothing internal leaks.
pub fn error_response(e: Error) -> Response {
    let status = match &e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Forbidden(_) => StatusCode::FORBIDDEN,
        Error::SessionClosed(_) => StatusCode::GONE,
        Error::Overloaded(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %e, "internal error");
    }
    (status, Json(serde_json::json!({ "error": e.user_message() }))).into_response()
}
