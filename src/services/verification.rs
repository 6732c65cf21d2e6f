use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::db::{SmsPreferences, SmsPreferencesRepository};
use crate::error::{AppError, AppResult};
use crate::services::sms::{
    MessageBody, NotificationRequest, NotificationType, SendOutcome, SmsService,
};
use crate::services::templates;
use crate::services::twilio::{is_valid_phone_number, mask_phone_number};
use crate::AppState;

pub const VERIFICATION_TTL_MINUTES: i64 = 10;

/// Phone ownership proof: a short-lived 6-digit code delivered over SMS.
/// Only the SHA-256 of the code is stored.
pub struct VerificationService {
    pool: SqlitePool,
    sms: SmsService,
}

impl VerificationService {
    pub fn new(state: &Arc<AppState>) -> Self {
        Self {
            pool: state.db.clone(),
            sms: SmsService::new(state),
        }
    }

    /// Generate and deliver a fresh code for `phone_number`, replacing any
    /// code still pending. The number is stored unverified until confirmed.
    /// Returns the challenge expiry for the caller to display.
    pub async fn send_code(&self, user_id: &str, phone_number: &str) -> AppResult<DateTime<Utc>> {
        if !is_valid_phone_number(phone_number) {
            return Err(AppError::Validation(
                "Invalid phone number; expected E.164 format, e.g. +15551234567".to_string(),
            ));
        }

        let code = generate_code();
        let expires_at = Utc::now() + Duration::minutes(VERIFICATION_TTL_MINUTES);

        SmsPreferencesRepository::store_verification(
            &self.pool,
            user_id,
            phone_number,
            &hash_code(&code),
            expires_at.naive_utc(),
        )
        .await?;

        let outcome = self
            .sms
            .send_notification(NotificationRequest {
                user_id: user_id.to_string(),
                farm_id: None,
                ntype: NotificationType::Verification,
                body: MessageBody::Literal(templates::verification_code(&code)),
            })
            .await?;

        match outcome {
            SendOutcome::Sent { .. } => {
                tracing::info!(
                    "Verification code sent to user {} at {}",
                    user_id,
                    mask_phone_number(phone_number)
                );
                Ok(expires_at)
            }
            SendOutcome::Failed { error, .. } => Err(AppError::Twilio(error)),
            // Verification bypasses every preference gate, so a denial here
            // means the evaluator changed underneath us.
            SendOutcome::Denied { reason } => Err(AppError::Internal(anyhow::anyhow!(
                "Verification send denied: {}",
                reason.message()
            ))),
        }
    }

    /// Check a submitted code against the pending challenge and, on match,
    /// mark the stored number as verified.
    pub async fn confirm_code(&self, user_id: &str, code: &str) -> AppResult<SmsPreferences> {
        if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(AppError::Validation(
                "Verification code must be 6 digits".to_string(),
            ));
        }

        let prefs = SmsPreferencesRepository::find_by_user_id(&self.pool, user_id)
            .await?
            .ok_or(AppError::NoVerificationPending)?;

        verify_pending(
            prefs.verification_code.as_deref(),
            prefs.verification_expires,
            code,
            Utc::now().naive_utc(),
        )?;

        let prefs = SmsPreferencesRepository::mark_phone_verified(&self.pool, user_id).await?;
        tracing::info!(
            "Phone {} verified for user {}",
            mask_phone_number(&prefs.phone_number),
            user_id
        );
        Ok(prefs)
    }
}

fn generate_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

pub fn hash_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

/// The pure half of confirmation. Checks run in order: a challenge must
/// exist, must not have expired, and must match.
fn verify_pending(
    stored_hash: Option<&str>,
    expires_at: Option<NaiveDateTime>,
    code: &str,
    now: NaiveDateTime,
) -> AppResult<()> {
    let (stored_hash, expires_at) = match (stored_hash, expires_at) {
        (Some(hash), Some(expires)) => (hash, expires),
        _ => return Err(AppError::NoVerificationPending),
    };

    if now > expires_at {
        return Err(AppError::VerificationExpired);
    }

    if hash_code(code) != stored_hash {
        return Err(AppError::VerificationMismatch);
    }

    Ok(())
}
