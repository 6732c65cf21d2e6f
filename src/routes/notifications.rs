//! Notification dispatch, delivery history and per-user stats.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{SmsJob, SmsJobRepository, SmsJobStatus};
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::services::sms::{
    MessageBody, NotificationRequest, NotificationType, SendOutcome, SmsService,
};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/send", post(send_notification))
        .route("/history", get(get_history))
        .route("/stats", get(get_stats))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SendSmsRequest {
    #[serde(rename = "type")]
    pub notification_type: String,
    /// Pre-rendered message body. Takes precedence over `params`.
    pub message: Option<String>,
    /// Template params, rendered server side when no `message` is given.
    pub params: Option<Value>,
    #[serde(default, alias = "farmId")]
    pub farm_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendSmsResponse {
    pub sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_sid: Option<String>,
    /// Why the message was withheld, e.g. "quiet_hours_active".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    /// Filter by notification type, e.g. "tank_low".
    #[serde(rename = "type")]
    pub notification_type: Option<String>,
    /// Filter by delivery status: pending, sent or failed.
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobsListResponse {
    pub items: Vec<JobResponse>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub user_id: String,
    pub farm_id: Option<String>,
    pub notification_type: String,
    pub message: String,
    pub phone_number: String,
    pub status: String,
    pub attempts: i32,
    pub sent_at: Option<NaiveDateTime>,
    pub failed_at: Option<NaiveDateTime>,
    pub error_message: Option<String>,
    pub message_sid: Option<String>,
    pub created_at: NaiveDateTime,
}

impl From<SmsJob> for JobResponse {
    fn from(job: SmsJob) -> Self {
        JobResponse {
            id: job.id,
            user_id: job.user_id,
            farm_id: job.farm_id,
            notification_type: job.notification_type,
            message: job.message,
            phone_number: job.phone_number,
            status: job.status,
            attempts: job.attempts,
            sent_at: job.sent_at,
            failed_at: job.failed_at,
            error_message: job.error_message,
            message_sid: job.twilio_message_sid,
            created_at: job.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_sent: i64,
    pub total_failed: i64,
    pub total_pending: i64,
    pub by_type: HashMap<String, i64>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Dispatch one SMS through the eligibility pipeline.
///
/// A withheld message is not an error: the response carries `sent: false`
/// plus the denial reason, and the caller decides whether that matters.
async fn send_notification(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<SendSmsRequest>,
) -> AppResult<Json<SendSmsResponse>> {
    let ntype = NotificationType::parse(&request.notification_type)
        .ok_or_else(|| AppError::UnknownNotificationType(request.notification_type.clone()))?;

    if ntype == NotificationType::Verification {
        return Err(AppError::BadRequest(
            "Verification codes are sent via /api/notifications/verify".to_string(),
        ));
    }

    let body = match (request.message, request.params) {
        (Some(message), _) if !message.is_empty() => MessageBody::Literal(message),
        (_, Some(params)) => MessageBody::Template(params),
        _ => {
            return Err(AppError::BadRequest(
                "Either message or params is required".to_string(),
            ))
        }
    };

    let outcome = SmsService::new(&state)
        .send_notification(NotificationRequest {
            user_id,
            farm_id: request.farm_id,
            ntype,
            body,
        })
        .await?;

    let response = match outcome {
        SendOutcome::Sent { job } => SendSmsResponse {
            sent: true,
            job_id: Some(job.id),
            message_sid: job.twilio_message_sid,
            reason: None,
            error: None,
        },
        SendOutcome::Denied { reason } => SendSmsResponse {
            sent: false,
            job_id: None,
            message_sid: None,
            reason: Some(reason.as_str().to_string()),
            error: None,
        },
        SendOutcome::Failed { job, error } => SendSmsResponse {
            sent: false,
            job_id: Some(job.id),
            message_sid: None,
            reason: None,
            error: Some(error),
        },
    };

    Ok(Json(response))
}

/// List delivery history for the current user
async fn get_history(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<ListJobsQuery>,
) -> AppResult<Json<JobsListResponse>> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * per_page;

    let ntype = query.notification_type.as_deref();
    let status = query.status.as_deref();

    let jobs =
        SmsJobRepository::list_for_user(&state.db, &user_id, ntype, status, per_page, offset)
            .await?;

    // Total count after applying the same filters
    let total = SmsJobRepository::count_for_user(&state.db, &user_id, ntype, status).await?;
    let total_pages = (total as f64 / per_page as f64).ceil() as i64;

    Ok(Json(JobsListResponse {
        items: jobs.into_iter().map(JobResponse::from).collect(),
        total,
        page,
        per_page,
        total_pages,
    }))
}

/// Get delivery statistics for the current user
async fn get_stats(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<StatsResponse>> {
    // Run aggregation queries in parallel
    let db = state.db.clone();

    let (total_sent, total_failed, total_pending, type_counts) = tokio::try_join!(
        {
            let db = db.clone();
            let user_id = user_id.clone();
            async move { SmsJobRepository::count_by_status(&db, &user_id, SmsJobStatus::Sent).await }
        },
        {
            let db = db.clone();
            let user_id = user_id.clone();
            async move {
                SmsJobRepository::count_by_status(&db, &user_id, SmsJobStatus::Failed).await
            }
        },
        {
            let db = db.clone();
            let user_id = user_id.clone();
            async move {
                SmsJobRepository::count_by_status(&db, &user_id, SmsJobStatus::Pending).await
            }
        },
        {
            let db = db.clone();
            let user_id = user_id.clone();
            async move { SmsJobRepository::counts_by_type(&db, &user_id).await }
        }
    )?;

    Ok(Json(StatsResponse {
        total_sent,
        total_failed,
        total_pending,
        by_type: type_counts.into_iter().collect(),
    }))
}
