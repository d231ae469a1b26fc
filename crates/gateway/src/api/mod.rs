//! HTTP surface.

pub mod auth;
pub mod chat;
pub mod pages;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(pages::root))
        .route("/login", get(pages::login_page).post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/country/", get(pages::country_selection))
        .route("/proceed-to-chat", post(pages::proceed_to_chat))
        .route("/chat/", get(pages::chat_page))
        .route("/chat-public/", get(chat::chat_public))
        .route("/sessions", get(pages::list_sessions))
        .route("/suggestions", get(pages::suggestions))
        .route("/health", get(pages::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
