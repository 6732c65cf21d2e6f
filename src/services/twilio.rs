use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;

use crate::config::TwilioConfig;
use crate::error::{AppError, AppResult};

// Twilio signs callbacks with HMAC-SHA1 over the account auth token.
type HmacSha1 = Hmac<Sha1>;

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Delivery backend for outbound SMS. Implementations return the provider's
/// message id on success so the job row can be correlated with later status
/// callbacks.
#[async_trait]
pub trait SmsTransport: Send + Sync + 'static {
    async fn send(&self, to: &str, body: &str) -> AppResult<String>;

    fn provider_name(&self) -> &'static str;
}

// ============================================================================
// Twilio transport
// ============================================================================

pub struct TwilioTransport {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    /// When set, every message is redirected here regardless of the requested
    /// recipient. Used in staging so test traffic never reaches real users.
    recipient_override: Option<String>,
    status_callback_url: Option<String>,
}

impl TwilioTransport {
    /// Build a live transport, or `None` when credentials are incomplete.
    pub fn new(config: &TwilioConfig) -> AppResult<Option<Self>> {
        let (sid, token, from) = match config.credentials() {
            Some(creds) => creds,
            None => return Ok(None),
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Twilio(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Some(Self {
            client,
            account_sid: sid.to_string(),
            auth_token: token.to_string(),
            from_number: from.to_string(),
            recipient_override: config.recipient_override.clone(),
            status_callback_url: config.status_callback_url.clone(),
        }))
    }

    fn api_url(&self) -> String {
        format!("{}/Accounts/{}/Messages.json", TWILIO_API_BASE, self.account_sid)
    }
}

/// The subset of Twilio's message resource we care about.
#[derive(Debug, Deserialize)]
struct TwilioMessageResponse {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct TwilioErrorResponse {
    code: Option<i64>,
    message: Option<String>,
}

#[async_trait]
impl SmsTransport for TwilioTransport {
    async fn send(&self, to: &str, body: &str) -> AppResult<String> {
        let to = match &self.recipient_override {
            Some(redirect) => {
                tracing::debug!(
                    "Recipient override active: redirecting SMS to {}",
                    mask_phone_number(redirect)
                );
                redirect.as_str()
            }
            None => to,
        };

        let mut form = vec![
            ("To", to),
            ("From", self.from_number.as_str()),
            ("Body", body),
        ];
        if let Some(callback) = &self.status_callback_url {
            form.push(("StatusCallback", callback.as_str()));
        }

        let response = self
            .client
            .post(self.api_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Twilio(format!("Failed to send SMS: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            // Twilio error bodies carry a numeric code worth preserving in the
            // job row, e.g. "21211: Invalid 'To' phone number".
            let detail = match serde_json::from_str::<TwilioErrorResponse>(&error_text) {
                Ok(TwilioErrorResponse {
                    code: Some(code),
                    message: Some(message),
                }) => format!("{}: {}", code, message),
                Ok(TwilioErrorResponse {
                    message: Some(message),
                    ..
                }) => message,
                _ => error_text,
            };
            return Err(AppError::Twilio(format!(
                "Twilio API error ({}): {}",
                status, detail
            )));
        }

        let message: TwilioMessageResponse = response
            .json()
            .await
            .map_err(|e| AppError::Twilio(format!("Failed to parse Twilio response: {}", e)))?;

        Ok(message.sid)
    }

    fn provider_name(&self) -> &'static str {
        "twilio"
    }
}

// ============================================================================
// Mock transport
// ============================================================================

/// Stand-in used when Twilio credentials are absent (local development, CI).
/// Logs the message and fabricates a message id.
pub struct MockTransport;

#[async_trait]
impl SmsTransport for MockTransport {
    async fn send(&self, to: &str, body: &str) -> AppResult<String> {
        tracing::info!("[MOCK SMS] to {}: {}", mask_phone_number(to), body);
        Ok(format!("MOCK_{}", Utc::now().timestamp_millis()))
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

/// Pick the transport for this process based on configured credentials.
pub fn build_transport(config: &TwilioConfig) -> AppResult<Arc<dyn SmsTransport>> {
    match TwilioTransport::new(config)? {
        Some(transport) => {
            tracing::info!(
                "Twilio transport configured, sending from {}",
                mask_phone_number(&transport.from_number)
            );
            Ok(Arc::new(transport))
        }
        None => {
            tracing::warn!(
                "Twilio credentials not configured; SMS delivery will use the mock transport"
            );
            Ok(Arc::new(MockTransport))
        }
    }
}

// ============================================================================
// Signature validation and phone helpers
// ============================================================================

/// The string Twilio signs: the full callback URL followed by every POST
/// parameter, sorted by key, with no separators.
fn signature_payload(url: &str, params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut payload = String::from(url);
    for (key, value) in sorted {
        payload.push_str(key);
        payload.push_str(value);
    }
    payload
}

/// Compute the `X-Twilio-Signature` value for a request.
pub fn compute_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
) -> AppResult<String> {
    let mut mac = HmacSha1::new_from_slice(auth_token.as_bytes())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to create HMAC: {}", e)))?;
    mac.update(signature_payload(url, params).as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Check a webhook's `X-Twilio-Signature` header against the auth token.
pub fn validate_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
    signature: &str,
) -> bool {
    let provided = match STANDARD.decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha1::new_from_slice(auth_token.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(signature_payload(url, params).as_bytes());
    mac.verify_slice(&provided).is_ok()
}

/// E.164: a leading '+', a non-zero first digit, 2 to 15 digits total.
pub fn is_valid_phone_number(phone: &str) -> bool {
    let digits = match phone.strip_prefix('+') {
        Some(rest) => rest,
        None => return false,
    };
    if digits.len() < 2 || digits.len() > 15 {
        return false;
    }

    let mut chars = digits.chars();
    match chars.next() {
        Some('1'..='9') => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_digit())
}

/// Keep the last four characters for log lines, hide the rest.
pub fn mask_phone_number(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn signature_round_trips() {
        let token = "test_auth_token";
        let url = "https://example.com/webhooks/twilio/status";
        let body = params(&[
            ("MessageSid", "SM123"),
            ("MessageStatus", "delivered"),
            ("To", "+15551234567"),
        ]);

        let sig = compute_signature(token, url, &body).unwrap();
        assert!(validate_signature(token, url, &body, &sig));
    }

    #[test]
    fn signature_is_order_invariant() {
        let token = "test_auth_token";
        let url = "https://example.com/webhooks/twilio/status";
        let a = params(&[("B", "2"), ("A", "1"), ("C", "3")]);
        let b = params(&[("C", "3"), ("A", "1"), ("B", "2")]);

        assert_eq!(
            compute_signature(token, url, &a).unwrap(),
            compute_signature(token, url, &b).unwrap()
        );
    }

    #[test]
    fn signature_rejects_tampering() {
        let token = "test_auth_token";
        let url = "https://example.com/webhooks/twilio/status";
        let body = params(&[("MessageSid", "SM123"), ("MessageStatus", "delivered")]);
        let sig = compute_signature(token, url, &body).unwrap();

        let tampered = params(&[("MessageSid", "SM123"), ("MessageStatus", "failed")]);
        assert!(!validate_signature(token, url, &tampered, &sig));
        assert!(!validate_signature("other_token", url, &body, &sig));
        assert!(!validate_signature(token, url, &body, "not-base64!!"));
    }

    #[test]
    fn phone_validation_follows_e164() {
        assert!(is_valid_phone_number("+15551234567"));
        assert!(is_valid_phone_number("+447911123456"));
        // 15 digits is the E.164 maximum.
        assert!(is_valid_phone_number("+123456789012345"));

        assert!(!is_valid_phone_number("+1234567890123456"));
        assert!(!is_valid_phone_number("15551234567"));
        assert!(!is_valid_phone_number("+05551234567"));
        assert!(!is_valid_phone_number("+1"));
        assert!(!is_valid_phone_number("+1555123456a"));
        assert!(!is_valid_phone_number(""));
    }

    #[test]
    fn masking_keeps_the_last_four() {
        assert_eq!(mask_phone_number("+15551234567"), "********4567");
        assert_eq!(mask_phone_number("+15"), "***");
        assert_eq!(mask_phone_number(""), "");
    }

    #[tokio::test]
    async fn mock_transport_fabricates_a_sid() {
        let sid = MockTransport.send("+15551234567", "hello").await.unwrap();
        assert!(sid.starts_with("MOCK_"));
        assert_eq!(MockTransport.provider_name(), "mock");
    }
}
