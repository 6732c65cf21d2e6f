use chrono::NaiveDateTime;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::models::{CreateSmsJob, SmsJob, SmsJobStatus};
use crate::error::{AppError, AppResult};

// ============================================================================
// SMS Job Repository
// ============================================================================

/// Repository for delivery jobs.
///
/// Implementation notes:
/// - Status transitions from carrier callbacks use guarded single-statement
///   updates (`UPDATE ... WHERE twilio_message_sid = ? AND status ... RETURNING ...`)
///   so repeated or out-of-order callbacks cannot double-apply or regress a
///   job. A no-match simply returns `None`.
/// - Synchronous transitions (`mark_sent` / `mark_failed`) are keyed by job
///   id and happen exactly once per transport call.
pub struct SmsJobRepository;

const COLUMNS: &str = "\
    id, user_id, farm_id, notification_type, message, phone_number, \
    status, attempts, max_attempts, scheduled_for, sent_at, failed_at, \
    error_message, twilio_message_sid, created_at";

impl SmsJobRepository {
    /// Insert a new pending job. Called before the transport is invoked so a
    /// crash mid-send leaves an auditable row.
    pub async fn create(
        pool: &SqlitePool,
        job: CreateSmsJob,
        now: NaiveDateTime,
    ) -> AppResult<SmsJob> {
        let id = Uuid::new_v4().to_string();
        let max_attempts = job.max_attempts.unwrap_or(3);

        let sql = format!(
            r#"
            INSERT INTO sms_jobs (
                id, user_id, farm_id, notification_type, message, phone_number,
                status, attempts, max_attempts, scheduled_for,
                sent_at, failed_at, error_message, twilio_message_sid, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, SmsJob>(&sql)
            .bind(id)
            .bind(job.user_id)
            .bind(job.farm_id)
            .bind(job.notification_type)
            .bind(job.message)
            .bind(job.phone_number)
            .bind(SmsJobStatus::Pending.as_str())
            .bind(0i32) // attempts
            .bind(max_attempts)
            .bind(now) // scheduled_for
            .bind::<Option<NaiveDateTime>>(None) // sent_at
            .bind::<Option<NaiveDateTime>>(None) // failed_at
            .bind::<Option<String>>(None) // error_message
            .bind::<Option<String>>(None) // twilio_message_sid
            .bind(now)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<SmsJob>> {
        let sql = format!("SELECT {COLUMNS} FROM sms_jobs WHERE id = ?");

        sqlx::query_as::<_, SmsJob>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn find_by_message_sid(
        pool: &SqlitePool,
        message_sid: &str,
    ) -> AppResult<Option<SmsJob>> {
        let sql = format!("SELECT {COLUMNS} FROM sms_jobs WHERE twilio_message_sid = ?");

        sqlx::query_as::<_, SmsJob>(&sql)
            .bind(message_sid)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Record a successful synchronous send: the carrier accepted the message
    /// and returned its sid.
    pub async fn mark_sent(
        pool: &SqlitePool,
        id: &str,
        message_sid: &str,
        now: NaiveDateTime,
    ) -> AppResult<SmsJob> {
        let sql = format!(
            r#"
            UPDATE sms_jobs
            SET status = 'sent',
                sent_at = ?,
                attempts = attempts + 1,
                twilio_message_sid = ?
            WHERE id = ?
            RETURNING {COLUMNS}
            "#
        );

        sqlx::query_as::<_, SmsJob>(&sql)
            .bind(now)
            .bind(message_sid)
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Record a failed synchronous send with the transport error verbatim.
    pub async fn mark_failed(
        pool: &SqlitePool,
        id: &str,
        error_message: &str,
        now: NaiveDateTime,
    ) -> AppResult<SmsJob> {
        let sql = format!(
            r#"
            UPDATE sms_jobs
            SET status = 'failed',
                failed_at = ?,
                attempts = attempts + 1,
                error_message = ?
            WHERE id = ?
            RETURNING {COLUMNS}
            "#
        );

        sqlx::query_as::<_, SmsJob>(&sql)
            .bind(now)
            .bind(error_message)
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Apply a carrier status callback to the job matching `message_sid`.
    ///
    /// Allowed transitions: pending -> sent, pending -> failed, and the
    /// single refinement sent -> failed (`undelivered` arriving after an
    /// optimistic sync success). Everything else, including repeats of the
    /// same terminal status, matches no row and returns `None`.
    pub async fn reconcile_by_message_sid(
        pool: &SqlitePool,
        message_sid: &str,
        status: SmsJobStatus,
        error_message: Option<String>,
        now: NaiveDateTime,
    ) -> AppResult<Option<SmsJob>> {
        let sql = match status {
            // queued/sending callbacks never touch the row
            SmsJobStatus::Pending => return Ok(None),
            SmsJobStatus::Sent => format!(
                r#"
                UPDATE sms_jobs
                SET status = 'sent', sent_at = ?
                WHERE twilio_message_sid = ? AND status = 'pending'
                RETURNING {COLUMNS}
                "#
            ),
            SmsJobStatus::Failed => format!(
                r#"
                UPDATE sms_jobs
                SET status = 'failed',
                    failed_at = ?,
                    error_message = COALESCE(?, error_message)
                WHERE twilio_message_sid = ? AND status IN ('pending', 'sent')
                RETURNING {COLUMNS}
                "#
            ),
        };

        let query = match status {
            SmsJobStatus::Pending => unreachable!(),
            SmsJobStatus::Sent => sqlx::query_as::<_, SmsJob>(&sql).bind(now).bind(message_sid),
            SmsJobStatus::Failed => sqlx::query_as::<_, SmsJob>(&sql)
                .bind(now)
                .bind(error_message)
                .bind(message_sid),
        };

        query.fetch_optional(pool).await.map_err(AppError::Database)
    }

    /// A user's jobs, newest first, with optional type/status filters.
    pub async fn list_for_user(
        pool: &SqlitePool,
        user_id: &str,
        notification_type: Option<&str>,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<SmsJob>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM sms_jobs
            WHERE user_id = ?
              AND (? IS NULL OR notification_type = ?)
              AND (? IS NULL OR status = ?)
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#
        );

        sqlx::query_as::<_, SmsJob>(&sql)
            .bind(user_id)
            .bind(notification_type)
            .bind(notification_type)
            .bind(status)
            .bind(status)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn count_for_user(
        pool: &SqlitePool,
        user_id: &str,
        notification_type: Option<&str>,
        status: Option<&str>,
    ) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM sms_jobs
            WHERE user_id = ?
              AND (? IS NULL OR notification_type = ?)
              AND (? IS NULL OR status = ?)
            "#,
        )
        .bind(user_id)
        .bind(notification_type)
        .bind(notification_type)
        .bind(status)
        .bind(status)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn count_by_status(
        pool: &SqlitePool,
        user_id: &str,
        status: SmsJobStatus,
    ) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sms_jobs WHERE user_id = ? AND status = ?",
        )
        .bind(user_id)
        .bind(status.as_str())
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn counts_by_type(
        pool: &SqlitePool,
        user_id: &str,
    ) -> AppResult<Vec<(String, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT notification_type, COUNT(*) as count
            FROM sms_jobs
            WHERE user_id = ?
            GROUP BY notification_type
            ORDER BY count DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("notification_type"), r.get::<i64, _>("count")))
            .collect())
    }
}
