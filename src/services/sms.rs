use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;

use crate::db::{CreateSmsJob, SmsJob, SmsJobRepository, SmsPreferencesRepository};
use crate::error::{AppError, AppResult};
use crate::services::eligibility::{self, Denial};
use crate::services::templates;
use crate::services::twilio::SmsTransport;
use crate::AppState;

/// Kinds of SMS the platform sends. The wire strings double as the
/// `notification_type` column in `sms_jobs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    Watering,
    FarmAction,
    Maintenance,
    TankLow,
    TankCritical,
    TankEmpty,
    TempHigh,
    TempLow,
    HumidityAlert,
    WeeklyPulse,
    Verification,
}

impl NotificationType {
    pub const ALL: [NotificationType; 11] = [
        NotificationType::Watering,
        NotificationType::FarmAction,
        NotificationType::Maintenance,
        NotificationType::TankLow,
        NotificationType::TankCritical,
        NotificationType::TankEmpty,
        NotificationType::TempHigh,
        NotificationType::TempLow,
        NotificationType::HumidityAlert,
        NotificationType::WeeklyPulse,
        NotificationType::Verification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Watering => "watering",
            NotificationType::FarmAction => "farm_action",
            NotificationType::Maintenance => "maintenance",
            NotificationType::TankLow => "tank_low",
            NotificationType::TankCritical => "tank_critical",
            NotificationType::TankEmpty => "tank_empty",
            NotificationType::TempHigh => "temp_high",
            NotificationType::TempLow => "temp_low",
            NotificationType::HumidityAlert => "humidity_alert",
            NotificationType::WeeklyPulse => "weekly_pulse",
            NotificationType::Verification => "verification",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

/// How the message text is obtained: verbatim from the caller, or rendered
/// from type-specific template params.
#[derive(Debug, Clone)]
pub enum MessageBody {
    Literal(String),
    Template(Value),
}

#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub user_id: String,
    pub farm_id: Option<String>,
    pub ntype: NotificationType,
    pub body: MessageBody,
}

/// What happened to a send request. Denials are ordinary outcomes surfaced
/// to the caller as data; only infrastructure problems become errors.
#[derive(Debug)]
pub enum SendOutcome {
    Sent { job: SmsJob },
    Denied { reason: Denial },
    Failed { job: SmsJob, error: String },
}

/// Orchestrates a single SMS end to end: preference gating, template
/// rendering, job bookkeeping and the transport call.
pub struct SmsService {
    pool: SqlitePool,
    transport: Arc<dyn SmsTransport>,
    daily_limit: u32,
    max_attempts: i32,
}

impl SmsService {
    pub fn new(state: &Arc<AppState>) -> Self {
        Self::from_parts(
            state.db.clone(),
            state.transport.clone(),
            state.config.sms.daily_limit,
            state.config.sms.max_attempts,
        )
    }

    pub fn from_parts(
        pool: SqlitePool,
        transport: Arc<dyn SmsTransport>,
        daily_limit: u32,
        max_attempts: i32,
    ) -> Self {
        Self {
            pool,
            transport,
            daily_limit,
            max_attempts,
        }
    }

    /// Send one notification for a user.
    ///
    /// The job row is inserted as `pending` before the transport call, so an
    /// interrupted send still leaves an auditable record. Verification codes
    /// skip the daily counter: those sends happen during onboarding and must
    /// never exhaust the user's quota.
    pub async fn send_notification(&self, request: NotificationRequest) -> AppResult<SendOutcome> {
        let prefs = SmsPreferencesRepository::get_or_create(&self.pool, &request.user_id).await?;
        let now = Utc::now();

        if let Err(reason) = eligibility::evaluate(&prefs, request.ntype, now, self.daily_limit) {
            tracing::info!(
                "Skipping {} SMS for user {}: {}",
                request.ntype.as_str(),
                request.user_id,
                reason.message()
            );
            return Ok(SendOutcome::Denied { reason });
        }

        let message = match &request.body {
            MessageBody::Literal(text) => text.clone(),
            MessageBody::Template(params) => templates::render_message(request.ntype, params)?,
        };

        let job = SmsJobRepository::create(
            &self.pool,
            CreateSmsJob {
                user_id: request.user_id.clone(),
                farm_id: request.farm_id.clone(),
                notification_type: request.ntype.as_str().to_string(),
                message: message.clone(),
                phone_number: prefs.phone_number.clone(),
                max_attempts: Some(self.max_attempts),
            },
            now.naive_utc(),
        )
        .await?;

        match self.transport.send(&prefs.phone_number, &message).await {
            Ok(message_sid) => {
                let job = SmsJobRepository::mark_sent(
                    &self.pool,
                    &job.id,
                    &message_sid,
                    Utc::now().naive_utc(),
                )
                .await?;

                if request.ntype != NotificationType::Verification {
                    SmsPreferencesRepository::record_send(
                        &self.pool,
                        &request.user_id,
                        Utc::now().naive_utc(),
                    )
                    .await?;
                }

                tracing::info!(
                    "Sent {} SMS for user {} via {} (job {}, sid {})",
                    request.ntype.as_str(),
                    request.user_id,
                    self.transport.provider_name(),
                    job.id,
                    message_sid
                );
                Ok(SendOutcome::Sent { job })
            }
            Err(e) => {
                let error = e.to_string();
                let job = SmsJobRepository::mark_failed(
                    &self.pool,
                    &job.id,
                    &error,
                    Utc::now().naive_utc(),
                )
                .await?;

                tracing::error!(
                    "Failed to send {} SMS for user {} (job {}): {}",
                    request.ntype.as_str(),
                    request.user_id,
                    job.id,
                    error
                );
                Ok(SendOutcome::Failed { job, error })
            }
        }
    }
}
