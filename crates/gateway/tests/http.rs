//! HTTP surface tests over an in-memory stack: scripted LLM, in-memory
//! profile index and session store, real router.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tower::ServiceExt;

use gb_agents::testing::ScriptedLlm;
use gb_domain::config::{Config, UserCredential};
use gb_gateway::api;
use gb_gateway::bootstrap;
use gb_retriever::{MemoryProfileIndex, Retriever};
use gb_sessions::SessionStore;
use sha2::{Digest, Sha256};

const DEV_EMAIL: &str = "dev@growbal.example";
const DEV_PASSWORD: &str = "hunter2";

async fn app(llm: &ScriptedLlm) -> (axum::Router, SessionStore) {
    let mut config = Config::default();
    config.auth.cookie_secret = Some("test-secret".into());
    config.auth.users.push(UserCredential {
        email: DEV_EMAIL.into(),
        password_sha256: hex::encode(Sha256::digest(DEV_PASSWORD.as_bytes())),
        owner_id: 1,
    });

    let mut index = MemoryProfileIndex::new();
    index.insert(
        1,
        "Company Name: Acme Tax\nCountry: UAE\nProvider Type: Accounting Firm\ntax services",
        &["tax"],
    );
    let retriever = Retriever::new(Arc::new(index));
    let store = SessionStore::open_in_memory().await.unwrap();

    let state = bootstrap::assemble(Arc::new(config), llm.client(), retriever, store.clone());
    (api::router(state), store)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn login_cookie(app: &axum::Router) -> String {
    let response = app
        .clone()
        .oneshot(
            Request::post("/login")
                .header(
                    header::CONTENT_TYPE,
                    "application/x-www-form-urlencoded",
                )
                .body(Body::from(format!(
                    "email={DEV_EMAIL}&password={DEV_PASSWORD}"
                )))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    set_cookie.split(';').next().unwrap().to_owned()
}

#[tokio::test]
async fn health_reports_ok() {
    let llm = ScriptedLlm::new();
    let (app, _) = app(&llm).await;

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["profiles_indexed"], 1);
}

#[tokio::test]
async fn country_listing_exposes_allowed_values() {
    let llm = ScriptedLlm::new();
    let (app, _) = app(&llm).await;

    let response = app
        .oneshot(Request::get("/country/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(response).await;
    assert!(json["countries"].as_array().unwrap().iter().any(|c| c == "UAE"));
    assert!(json["service_types"]
        .as_array()
        .unwrap()
        .iter()
        .any(|s| s == "Tax Services"));
}

#[tokio::test]
async fn root_redirects_by_auth_state() {
    let llm = ScriptedLlm::new();
    let (app, _) = app(&llm).await;

    let anonymous = app
        .clone()
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(anonymous.headers()[header::LOCATION], "/login");

    let cookie = login_cookie(&app).await;
    let authed = app
        .oneshot(
            Request::get("/")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(authed.headers()[header::LOCATION], "/country/");
}

#[tokio::test]
async fn duplicate_proceed_to_chat_reuses_the_session() {
    let llm = ScriptedLlm::new();
    let (app, _) = app(&llm).await;
    let cookie = login_cookie(&app).await;

    let submit = || {
        app.clone().oneshot(
            Request::post("/proceed-to-chat")
                .header(header::COOKIE, cookie.clone())
                .header(
                    header::CONTENT_TYPE,
                    "application/x-www-form-urlencoded",
                )
                .body(Body::from("country=UAE&service_type=Tax+Services"))
                .unwrap(),
        )
    };

    let first = submit().await.unwrap();
    assert_eq!(first.status(), StatusCode::SEE_OTHER);
    let first_location = first.headers()[header::LOCATION].to_str().unwrap().to_owned();
    assert!(first_location.starts_with("/chat/?session_id="));

    let second = submit().await.unwrap();
    let second_location = second.headers()[header::LOCATION].to_str().unwrap().to_owned();
    assert_eq!(first_location, second_location);
}

#[tokio::test]
async fn unknown_country_is_rejected() {
    let llm = ScriptedLlm::new();
    let (app, _) = app(&llm).await;

    let response = app
        .oneshot(
            Request::post("/proceed-to-chat")
                .header(
                    header::CONTENT_TYPE,
                    "application/x-www-form-urlencoded",
                )
                .body(Body::from("country=Atlantis&service_type=Tax+Services"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_page_enforces_auth_ownership_and_existence() {
    let llm = ScriptedLlm::new();
    let (app, store) = app(&llm).await;
    let cookie = login_cookie(&app).await;

    // Owned by user 1 (the dev login).
    let (mine, _) = store
        .get_or_create(None, Some(1), "UAE", "Tax Services")
        .await
        .unwrap();
    // Owned by someone else.
    let (theirs, _) = store
        .get_or_create(None, Some(2), "UAE", "Tax Services")
        .await
        .unwrap();

    let get = |session_id: uuid::Uuid, with_cookie: bool| {
        let mut req = Request::get(format!("/chat/?session_id={session_id}"));
        if with_cookie {
            req = req.header(header::COOKIE, cookie.clone());
        }
        app.clone().oneshot(req.body(Body::empty()).unwrap())
    };

    assert_eq!(
        get(mine.session_id, false).await.unwrap().status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        get(theirs.session_id, true).await.unwrap().status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        get(uuid::Uuid::new_v4(), true).await.unwrap().status(),
        StatusCode::NOT_FOUND
    );

    let ok = get(mine.session_id, true).await.unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    let json = body_json(ok).await;
    assert_eq!(json["session"]["country"], "UAE");
}

#[tokio::test]
async fn chat_public_streams_a_conversational_turn() {
    let llm = ScriptedLlm::new();
    llm.push_chat_ok(
        r#"{"tool_needed": true, "tool": "conversational", "summary": "greeting", "direct_response": null}"#,
    );
    llm.push_chat_ok("Hello! Ask me about tax providers.");

    let (app, store) = app(&llm).await;

    let response = app
        .oneshot(
            Request::get("/chat-public/?country=UAE&service_type=Tax+Services&message=hello")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8_lossy(&bytes);
    assert!(body.contains("event: final"));
    assert!(body.contains("Hello! Ask me about tax providers."));

    // The turn persisted into the tuple-resolved session.
    let (session, created) = store
        .get_or_create(None, None, "UAE", "Tax Services")
        .await
        .unwrap();
    assert!(!created);
    let history = store.history(session.session_id, 10).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn chat_public_requires_a_message() {
    let llm = ScriptedLlm::new();
    let (app, _) = app(&llm).await;

    let response = app
        .oneshot(
            Request::get("/chat-public/?country=UAE&service_type=Tax+Services&message=")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8_lossy(&bytes);
    assert!(body.contains("event: error"));
}
