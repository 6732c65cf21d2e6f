//! SMS preference routes: read and update per-user notification settings.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::{NaiveDateTime, NaiveTime};
use chrono_tz::Tz;
use serde::Serialize;

use crate::db::{SmsPreferences, SmsPreferencesRepository, UpdateSmsPreferences};
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::services::twilio;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(get_preferences).put(update_preferences))
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct PreferencesResponse {
    pub enabled: bool,
    pub phone_number: String,
    pub phone_verified: bool,
    pub categories: CategoriesResponse,
    pub quiet_hours: QuietHoursResponse,
    pub daily_sms_count: i32,
    pub daily_limit: u32,
    pub last_sms_at: Option<NaiveDateTime>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Serialize)]
pub struct CategoriesResponse {
    pub watering_confirmation: bool,
    pub maintenance_reminders: bool,
    pub water_tank_alerts: bool,
    pub environmental_alerts: bool,
    pub weekly_pulse: bool,
}

#[derive(Debug, Serialize)]
pub struct QuietHoursResponse {
    pub enabled: bool,
    pub start: String,
    pub end: String,
    pub timezone: String,
}

impl PreferencesResponse {
    /// Shapes a preferences row for the API. The pending verification code
    /// hash and its expiry never leave the database.
    fn from_prefs(prefs: SmsPreferences, daily_limit: u32) -> Self {
        Self {
            enabled: prefs.enabled,
            phone_number: prefs.phone_number,
            phone_verified: prefs.phone_verified,
            categories: CategoriesResponse {
                watering_confirmation: prefs.watering_confirmation,
                maintenance_reminders: prefs.maintenance_reminders,
                water_tank_alerts: prefs.water_tank_alerts,
                environmental_alerts: prefs.environmental_alerts,
                weekly_pulse: prefs.weekly_pulse,
            },
            quiet_hours: QuietHoursResponse {
                enabled: prefs.quiet_hours_enabled,
                start: prefs.quiet_hours_start,
                end: prefs.quiet_hours_end,
                timezone: prefs.quiet_hours_timezone,
            },
            daily_sms_count: prefs.daily_sms_count,
            daily_limit,
            last_sms_at: prefs.last_sms_at,
            updated_at: prefs.updated_at,
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

fn validate_update(update: &UpdateSmsPreferences) -> AppResult<()> {
    if let Some(phone) = &update.phone_number {
        // An empty string clears the stored number; anything else must be E.164.
        if !phone.is_empty() && !twilio::is_valid_phone_number(phone) {
            return Err(AppError::Validation(
                "Invalid phone number; expected E.164 format, e.g. +15551234567".to_string(),
            ));
        }
    }

    if let Some(quiet) = &update.quiet_hours {
        if let Some(start) = &quiet.start {
            if NaiveTime::parse_from_str(start, "%H:%M").is_err() {
                return Err(AppError::Validation(format!(
                    "Invalid quiet hours start {:?}; expected HH:MM",
                    start
                )));
            }
        }
        if let Some(end) = &quiet.end {
            if NaiveTime::parse_from_str(end, "%H:%M").is_err() {
                return Err(AppError::Validation(format!(
                    "Invalid quiet hours end {:?}; expected HH:MM",
                    end
                )));
            }
        }
        if let Some(tz) = &quiet.timezone {
            if tz.parse::<Tz>().is_err() {
                return Err(AppError::Validation(format!(
                    "Unknown timezone {:?}; expected an IANA zone name",
                    tz
                )));
            }
        }
    }

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// GET / - current SMS preferences for the authenticated user.
async fn get_preferences(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<PreferencesResponse>> {
    let prefs = SmsPreferencesRepository::get_or_create(&state.db, &user_id).await?;

    Ok(Json(PreferencesResponse::from_prefs(
        prefs,
        state.config.sms.daily_limit,
    )))
}

/// PUT / - partial update; absent fields keep their current values. Changing
/// the phone number drops its verified status until the new number confirms
/// a code.
async fn update_preferences(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(update): Json<UpdateSmsPreferences>,
) -> AppResult<Json<PreferencesResponse>> {
    validate_update(&update)?;

    let prefs = SmsPreferencesRepository::update(&state.db, &user_id, update).await?;
    tracing::info!("Updated SMS preferences for user {}", user_id);

    Ok(Json(PreferencesResponse::from_prefs(
        prefs,
        state.config.sms.daily_limit,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use crate::test_support::{auth_token, body_json, test_state};

    fn get_request(token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri("/");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn put_request(token: &str, payload: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri("/")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn rejects_requests_without_a_token() {
        let state = test_state().await;
        let app = router().with_state(state);

        let response = app.oneshot(get_request(None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn get_returns_defaults_for_a_new_user() {
        let state = test_state().await;
        let app = router().with_state(state);
        let token = auth_token("user-1");

        let response = app.oneshot(get_request(Some(&token))).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["enabled"], false);
        assert_eq!(body["phone_number"], "");
        assert_eq!(body["phone_verified"], false);
        assert_eq!(body["categories"]["watering_confirmation"], true);
        assert_eq!(body["categories"]["weekly_pulse"], true);
        assert_eq!(body["quiet_hours"]["enabled"], false);
        assert_eq!(body["quiet_hours"]["start"], "22:00");
        assert_eq!(body["quiet_hours"]["end"], "08:00");
        assert_eq!(body["daily_sms_count"], 0);
        assert_eq!(body["daily_limit"], 50);
        assert!(body.get("verification_code").is_none());
    }

    #[tokio::test]
    async fn put_merges_partial_updates() {
        let state = test_state().await;
        let app = router().with_state(state);
        let token = auth_token("user-1");

        let payload = json!({
            "enabled": true,
            "phone_number": "+15551234567",
            "quiet_hours": { "enabled": true, "start": "21:00" },
        });
        let response = app.oneshot(put_request(&token, payload)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["enabled"], true);
        assert_eq!(body["phone_number"], "+15551234567");
        assert_eq!(body["quiet_hours"]["enabled"], true);
        assert_eq!(body["quiet_hours"]["start"], "21:00");
        // Untouched fields keep their previous values.
        assert_eq!(body["quiet_hours"]["end"], "08:00");
        assert_eq!(body["categories"]["water_tank_alerts"], true);
    }

    #[tokio::test]
    async fn put_accepts_camel_case_aliases() {
        let state = test_state().await;
        let app = router().with_state(state);
        let token = auth_token("user-1");

        let payload = json!({
            "smsEnabled": true,
            "phoneNumber": "+15551234567",
            "categories": { "weeklyPulse": false },
        });
        let response = app.oneshot(put_request(&token, payload)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["enabled"], true);
        assert_eq!(body["phone_number"], "+15551234567");
        assert_eq!(body["categories"]["weekly_pulse"], false);
    }

    #[tokio::test]
    async fn changing_the_phone_number_resets_verification() {
        let state = test_state().await;
        let token = auth_token("user-1");

        let first = put_request(&token, json!({ "phone_number": "+15551234567" }));
        let response = router()
            .with_state(state.clone())
            .oneshot(first)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        SmsPreferencesRepository::mark_phone_verified(&state.db, "user-1")
            .await
            .unwrap();

        let second = put_request(&token, json!({ "phone_number": "+15557654321" }));
        let response = router()
            .with_state(state.clone())
            .oneshot(second)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["phone_number"], "+15557654321");
        assert_eq!(body["phone_verified"], false);
    }

    #[tokio::test]
    async fn put_allows_clearing_the_phone_number() {
        let state = test_state().await;
        let token = auth_token("user-1");

        let set = put_request(&token, json!({ "phone_number": "+15551234567" }));
        router()
            .with_state(state.clone())
            .oneshot(set)
            .await
            .unwrap();

        let clear = put_request(&token, json!({ "phone_number": "" }));
        let response = router()
            .with_state(state.clone())
            .oneshot(clear)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["phone_number"], "");
        assert_eq!(body["phone_verified"], false);
    }

    #[tokio::test]
    async fn put_rejects_a_malformed_phone_number() {
        let state = test_state().await;
        let app = router().with_state(state);
        let token = auth_token("user-1");

        let payload = json!({ "phone_number": "555-1234" });
        let response = app.oneshot(put_request(&token, payload)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn put_rejects_malformed_quiet_hours() {
        let state = test_state().await;
        let token = auth_token("user-1");

        let bad_time = put_request(&token, json!({ "quiet_hours": { "start": "25:99" } }));
        let response = router()
            .with_state(state.clone())
            .oneshot(bad_time)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let bad_zone = put_request(
            &token,
            json!({ "quiet_hours": { "timezone": "Mars/Olympus_Mons" } }),
        );
        let response = router()
            .with_state(state.clone())
            .oneshot(bad_zone)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }
}
