use serde_json::{json, Value};
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use rusty_rooms::auth::{JwtAuth, PasswordPolicy, TokenManager};
use rusty_rooms::config::ServerConfig;
use rusty_rooms::context::AppContext;
use rusty_rooms::core::hub::Hub;
use rusty_rooms::handlers::routes;
use rusty_rooms::pubsub::MemoryBus;
use rusty_rooms::storage::{MemoryRoomRepository, MemoryUserRepository};

async fn app() -> (
    impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone,
    AppContext,
) {
    let config = ServerConfig::for_testing();
    let auth = Arc::new(JwtAuth::new(
        TokenManager::with_ttl(&config.jwt_secret, config.token_ttl),
        PasswordPolicy::fast(),
    ));
    let ctx = AppContext::new(
        config,
        auth,
        Arc::new(MemoryUserRepository::new()),
        Arc::new(MemoryRoomRepository::new()),
        Arc::new(MemoryBus::new()),
    );
    let hub = Hub::start(ctx.clone()).await.unwrap();
    (routes(ctx.clone(), hub), ctx)
}

fn post(path: &str, body: Value) -> warp::test::RequestBuilder {
    warp::test::request().method("POST").path(path).json(&body)
}

fn error_of(body: &[u8]) -> String {
    let value: Value = serde_json::from_slice(body).unwrap();
    value["error"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_register_then_login() {
    let (routes, ctx) = app().await;

    let res = post(
        "/api/registration",
        json!({"name": "Alice", "username": "alice", "password": "pw", "confirmation": "pw"}),
    )
    .reply(&routes)
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    let token = String::from_utf8(res.body().to_vec()).unwrap();
    let registered = ctx.auth.validate_token(&token).unwrap();
    assert_eq!(registered.name, "Alice");

    let stored = ctx.users.find_user_by_username("alice").await.unwrap().unwrap();
    assert_eq!(stored.id, registered.id);
    assert_ne!(stored.password_hash.as_deref(), Some("pw"));

    let res = post("/api/login", json!({"username": "alice", "password": "pw"}))
        .reply(&routes)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let login_token = String::from_utf8(res.body().to_vec()).unwrap();
    assert_eq!(ctx.auth.validate_token(&login_token).unwrap().id, registered.id);
}

#[tokio::test]
async fn test_registration_rejects_mismatch_and_duplicates() {
    let (routes, _ctx) = app().await;

    let res = post(
        "/api/registration",
        json!({"name": "Bob", "username": "bob", "password": "a", "confirmation": "b"}),
    )
    .reply(&routes)
    .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_of(res.body()), "Password and confirmation do not match");

    let body = json!({"name": "Bob", "username": "bob", "password": "a", "confirmation": "a"});
    let first = post("/api/registration", body.clone()).reply(&routes).await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = post("/api/registration", body).reply(&routes).await;
    assert_eq!(second.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_of(second.body()), "User already exists");
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let (routes, _ctx) = app().await;

    post(
        "/api/registration",
        json!({"name": "Carol", "username": "carol", "password": "right", "confirmation": "right"}),
    )
    .reply(&routes)
    .await;

    let wrong_password = post("/api/login", json!({"username": "carol", "password": "wrong"}))
        .reply(&routes)
        .await;
    let unknown_user = post("/api/login", json!({"username": "nobody", "password": "right"}))
        .reply(&routes)
        .await;

    for res in [wrong_password, unknown_user] {
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_of(res.body()), "Login failed");
    }
}
