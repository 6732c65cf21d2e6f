//! Phone verification routes: request a code, then confirm it.

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::routes::auth::AuthUser;
use crate::services::verification::VerificationService;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/send", post(send_code))
        .route("/confirm", post(confirm_code))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SendCodeRequest {
    #[serde(alias = "phoneNumber")]
    pub phone_number: String,
}

#[derive(Debug, Serialize)]
pub struct SendCodeResponse {
    pub success: bool,
    pub message: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmCodeRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ConfirmCodeResponse {
    pub success: bool,
    pub phone_verified: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Deliver a six digit code to the given number
async fn send_code(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<SendCodeRequest>,
) -> AppResult<Json<SendCodeResponse>> {
    let expires_at = VerificationService::new(&state)
        .send_code(&user_id, &request.phone_number)
        .await?;

    Ok(Json(SendCodeResponse {
        success: true,
        message: "Verification code sent".to_string(),
        expires_at,
    }))
}

/// Confirm a pending code, marking the phone number verified
async fn confirm_code(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<ConfirmCodeRequest>,
) -> AppResult<Json<ConfirmCodeResponse>> {
    let prefs = VerificationService::new(&state)
        .confirm_code(&user_id, &request.code)
        .await?;

    Ok(Json(ConfirmCodeResponse {
        success: true,
        phone_verified: prefs.phone_verified,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use chrono::{Duration, Utc};
    use serde_json::json;
    use tower::ServiceExt;

    use crate::db::SmsPreferencesRepository;
    use crate::services::verification::hash_code;
    use crate::test_support::{auth_token, body_json, test_state};

    fn post_json(token: &str, uri: &str, payload: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn send_stores_a_challenge_and_reports_success() {
        let state = test_state().await;
        let token = auth_token("user-1");

        let payload = json!({ "phoneNumber": "+15550001111" });
        let response = router()
            .with_state(state.clone())
            .oneshot(post_json(&token, "/send", payload))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert!(body["expires_at"].is_string());

        let prefs = SmsPreferencesRepository::find_by_user_id(&state.db, "user-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(prefs.phone_number, "+15550001111");
        assert!(!prefs.phone_verified);
        assert!(prefs.verification_code.is_some());
    }

    #[tokio::test]
    async fn send_rejects_a_malformed_number() {
        let state = test_state().await;
        let token = auth_token("user-1");

        let payload = json!({ "phone_number": "555-1234" });
        let response = router()
            .with_state(state.clone())
            .oneshot(post_json(&token, "/send", payload))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn confirm_accepts_the_pending_code() {
        let state = test_state().await;
        let token = auth_token("user-1");

        let expires = Utc::now() + Duration::minutes(10);
        SmsPreferencesRepository::store_verification(
            &state.db,
            "user-1",
            "+15550001111",
            &hash_code("123456"),
            expires.naive_utc(),
        )
        .await
        .unwrap();

        let response = router()
            .with_state(state.clone())
            .oneshot(post_json(&token, "/confirm", json!({ "code": "123456" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["phone_verified"], true);
    }

    #[tokio::test]
    async fn confirm_rejects_a_wrong_code() {
        let state = test_state().await;
        let token = auth_token("user-1");

        let expires = Utc::now() + Duration::minutes(10);
        SmsPreferencesRepository::store_verification(
            &state.db,
            "user-1",
            "+15550001111",
            &hash_code("123456"),
            expires.naive_utc(),
        )
        .await
        .unwrap();

        let response = router()
            .with_state(state.clone())
            .oneshot(post_json(&token, "/confirm", json!({ "code": "654321" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "VERIFICATION_INCORRECT");
    }

    #[tokio::test]
    async fn confirm_without_a_pending_challenge_fails() {
        let state = test_state().await;
        let token = auth_token("user-1");

        let response = router()
            .with_state(state.clone())
            .oneshot(post_json(&token, "/confirm", json!({ "code": "123456" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "VERIFICATION_NOT_PENDING");
    }
}
