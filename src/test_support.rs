//! Shared helpers for router-level tests.

use std::sync::Arc;

use axum::response::Response;
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use sqlx::sqlite::SqlitePoolOptions;

use crate::config::Config;
use crate::routes::auth::Claims;
use crate::services::twilio::MockTransport;
use crate::AppState;

pub const TEST_JWT_SECRET: &str = "router-test-secret";

/// In-memory application state with migrations applied and the mock SMS
/// transport wired in. One connection so every query sees the same
/// `sqlite::memory:` database.
pub async fn test_state() -> Arc<AppState> {
    test_state_with(|_| {}).await
}

/// Like [`test_state`], with a hook to adjust the config first.
pub async fn test_state_with(configure: impl FnOnce(&mut Config)) -> Arc<AppState> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let mut config = Config::default();
    config.jwt.secret = TEST_JWT_SECRET.to_string();
    configure(&mut config);

    Arc::new(AppState {
        db: pool,
        config,
        transport: Arc::new(MockTransport),
    })
}

/// Mints a bearer token for `user_id`, signed with the test secret.
pub fn auth_token(user_id: &str) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

/// Collects a response body and parses it as JSON.
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
