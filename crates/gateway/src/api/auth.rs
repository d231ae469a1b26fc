//! Cookie authentication.
//!
//! Credentials live in an external read-only store behind
//! [`CredentialStore`]; the config-backed implementation is the dev-mode
//! stand-in. Session cookies are `owner:expiry:hmac` with an HMAC-SHA256
//! tag over the first two parts, compared in constant time.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Form;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use gb_domain::config::AuthConfig;

use crate::state::AppState;

pub const SESSION_COOKIE: &str = "growbal_session";

type HmacSha256 = Hmac<Sha256>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Credential store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read-only credential verification. Production points this at the
/// platform's account store; the config list below is for development.
pub trait CredentialStore: Send + Sync {
    /// `Some(owner_id)` when the email/password pair is valid.
    fn verify(&self, email: &str, password: &str) -> Option<i64>;
}

/// Dev-mode store over `[auth.users]` config entries (SHA-256 password
/// hashes).
pub struct ConfigCredentialStore {
    users: Vec<(String, Vec<u8>, i64)>,
}

impl ConfigCredentialStore {
    pub fn new(config: &AuthConfig) -> Self {
        let users = config
            .users
            .iter()
            .filter_map(|u| {
                let hash = hex::decode(&u.password_sha256).ok()?;
                Some((u.email.to_lowercase(), hash, u.owner_id))
            })
            .collect();
        Self { users }
    }
}

impl CredentialStore for ConfigCredentialStore {
    fn verify(&self, email: &str, password: &str) -> Option<i64> {
        let email = email.to_lowercase();
        let provided = Sha256::digest(password.as_bytes());
        for (stored_email, stored_hash, owner_id) in &self.users {
            if *stored_email == email
                && bool::from(provided.as_slice().ct_eq(stored_hash.as_slice()))
            {
                return Some(*owner_id);
            }
        }
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cookie minting / verification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CookieAuth {
    key: Vec<u8>,
    ttl_secs: i64,
    store: Arc<dyn CredentialStore>,
}

impl CookieAuth {
    pub fn new(key: Vec<u8>, ttl_secs: u64, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            key,
            ttl_secs: ttl_secs as i64,
            store,
        }
    }

    /// Verify credentials and mint a cookie value on success.
    pub fn login(&self, email: &str, password: &str) -> Option<String> {
        let owner_id = self.store.verify(email, password)?;
        Some(self.mint(owner_id))
    }

    pub fn mint(&self, owner_id: i64) -> String {
        let expiry = chrono::Utc::now().timestamp() + self.ttl_secs;
        let payload = format!("{owner_id}:{expiry}");
        format!("{payload}:{}", self.tag(&payload))
    }

    /// `Some(owner_id)` for an untampered, unexpired cookie value.
    pub fn verify(&self, cookie_value: &str) -> Option<i64> {
        let (payload, tag) = cookie_value.rsplit_once(':')?;
        let expected = self.tag(payload);
        if !bool::from(expected.as_bytes().ct_eq(tag.as_bytes())) {
            return None;
        }

        let (owner, expiry) = payload.split_once(':')?;
        let expiry: i64 = expiry.parse().ok()?;
        if chrono::Utc::now().timestamp() >= expiry {
            return None;
        }
        owner.parse().ok()
    }

    fn tag(&self, payload: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Owner id from the request's cookie header, if authenticated.
    pub fn authenticate(&self, headers: &HeaderMap) -> Option<i64> {
        let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
        for part in cookies.split(';') {
            let part = part.trim();
            if let Some(value) = part.strip_prefix(&format!("{SESSION_COOKIE}=")) {
                return self.verify(value);
            }
        }
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

/// `POST /login`
pub async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    match state.auth.login(&form.email, &form.password) {
        Some(cookie) => {
            let set_cookie = format!("{SESSION_COOKIE}={cookie}; Path=/; HttpOnly; SameSite=Lax");
            (
                [(header::SET_COOKIE, set_cookie)],
                Redirect::to("/country/"),
            )
                .into_response()
        }
        None => (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": "invalid credentials" })),
        )
            .into_response(),
    }
}

/// `POST /logout`
pub async fn logout() -> Response {
    let clear = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; Max-Age=0");
    ([(header::SET_COOKIE, clear)], Redirect::to("/")).into_response()
}
