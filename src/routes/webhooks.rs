//! Twilio webhook routes: delivery status callbacks and inbound SMS.
//!
//! Twilio retries deliveries on non-2xx responses, so these handlers
//! acknowledge with 200 even when a payload is unusable or fails signature
//! validation; the problem is logged instead of surfaced.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};

use crate::services::twilio::validate_signature;
use crate::services::webhooks::{InboundSms, StatusCallback, TwilioWebhookService};
use crate::AppState;

/// Empty TwiML document: acknowledged, no reply.
const EMPTY_TWIML: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response></Response>";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/twilio/status", post(handle_status_callback))
        .route("/twilio/inbound", post(handle_inbound_sms))
}

async fn handle_status_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let params = parse_form_params(&body);

    if !signature_ok(&state, &headers, "/webhooks/twilio/status", &params) {
        tracing::warn!("Ignoring status callback with an invalid Twilio signature");
        return (StatusCode::OK, "OK".to_string());
    }

    match StatusCallback::from_params(&params) {
        Some(callback) => {
            if let Err(e) =
                TwilioWebhookService::process_status_callback(&state.db, &callback).await
            {
                tracing::error!(
                    "Failed to process status callback for {}: {}",
                    callback.message_sid,
                    e
                );
            }
        }
        None => {
            tracing::warn!("Status callback missing MessageSid or MessageStatus");
        }
    }

    (StatusCode::OK, "OK".to_string())
}

async fn handle_inbound_sms(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let params = parse_form_params(&body);

    if signature_ok(&state, &headers, "/webhooks/twilio/inbound", &params) {
        match InboundSms::from_params(&params) {
            Some(inbound) => {
                if let Err(e) = TwilioWebhookService::process_inbound_sms(&state.db, &inbound).await
                {
                    tracing::error!("Failed to process inbound SMS: {}", e);
                }
            }
            None => {
                tracing::warn!("Inbound SMS missing From or Body");
            }
        }
    } else {
        tracing::warn!("Ignoring inbound SMS with an invalid Twilio signature");
    }

    ([(header::CONTENT_TYPE, "text/xml")], EMPTY_TWIML).into_response()
}

fn parse_form_params(body: &Bytes) -> Vec<(String, String)> {
    url::form_urlencoded::parse(body).into_owned().collect()
}

/// True when the request carries a valid X-Twilio-Signature, or when
/// validation is switched off. The signed URL is rebuilt from the configured
/// public base, since Twilio signs the URL it was given.
fn signature_ok(
    state: &AppState,
    headers: &HeaderMap,
    path: &str,
    params: &[(String, String)],
) -> bool {
    if !state.config.twilio.validate_signatures {
        return true;
    }

    let auth_token = match state.config.twilio.auth_token.as_deref() {
        Some(token) => token,
        None => {
            tracing::warn!("Twilio signature validation is on but no auth token is configured");
            return true;
        }
    };

    let signature = headers
        .get("x-twilio-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let url = format!(
        "{}{}",
        state.config.server.webhook_url.trim_end_matches('/'),
        path
    );

    validate_signature(auth_token, &url, params, signature)
}
