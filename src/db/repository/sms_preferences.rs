use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{SmsPreferences, UpdateSmsPreferences};
use crate::error::{AppError, AppResult};

// ============================================================================
// SMS Preferences Repository
// ============================================================================

/// Column list shared by every query that returns a full row.
const COLUMNS: &str = "\
    id, user_id, enabled, phone_number, phone_verified, \
    verification_code, verification_expires, \
    watering_confirmation, maintenance_reminders, water_tank_alerts, \
    environmental_alerts, weekly_pulse, \
    quiet_hours_enabled, quiet_hours_start, quiet_hours_end, quiet_hours_timezone, \
    daily_sms_count, last_sms_at, last_count_reset, \
    created_at, updated_at";

pub struct SmsPreferencesRepository;

impl SmsPreferencesRepository {
    pub async fn create(pool: &SqlitePool, user_id: &str) -> AppResult<SmsPreferences> {
        let id = Uuid::new_v4().to_string();
        let defaults = SmsPreferences::default();
        let now = Utc::now().naive_utc();

        let sql = format!(
            r#"
            INSERT INTO sms_preferences (
                id, user_id, enabled, phone_number, phone_verified,
                verification_code, verification_expires,
                watering_confirmation, maintenance_reminders, water_tank_alerts,
                environmental_alerts, weekly_pulse,
                quiet_hours_enabled, quiet_hours_start, quiet_hours_end, quiet_hours_timezone,
                daily_sms_count, last_sms_at, last_count_reset,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, SmsPreferences>(&sql)
            .bind(id)
            .bind(user_id)
            .bind(defaults.enabled)
            .bind(defaults.phone_number)
            .bind(defaults.phone_verified)
            .bind::<Option<String>>(None) // verification_code
            .bind::<Option<NaiveDateTime>>(None) // verification_expires
            .bind(defaults.watering_confirmation)
            .bind(defaults.maintenance_reminders)
            .bind(defaults.water_tank_alerts)
            .bind(defaults.environmental_alerts)
            .bind(defaults.weekly_pulse)
            .bind(defaults.quiet_hours_enabled)
            .bind(defaults.quiet_hours_start)
            .bind(defaults.quiet_hours_end)
            .bind(defaults.quiet_hours_timezone)
            .bind(defaults.daily_sms_count)
            .bind::<Option<NaiveDateTime>>(None) // last_sms_at
            .bind::<Option<NaiveDateTime>>(None) // last_count_reset
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn find_by_user_id(
        pool: &SqlitePool,
        user_id: &str,
    ) -> AppResult<Option<SmsPreferences>> {
        let sql = format!("SELECT {COLUMNS} FROM sms_preferences WHERE user_id = ?");

        sqlx::query_as::<_, SmsPreferences>(&sql)
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn get_or_create(pool: &SqlitePool, user_id: &str) -> AppResult<SmsPreferences> {
        if let Some(prefs) = Self::find_by_user_id(pool, user_id).await? {
            Ok(prefs)
        } else {
            Self::create(pool, user_id).await
        }
    }

    /// Merge a partial update over the current row and write the result as a
    /// single UPDATE. Changing the phone number invalidates verification:
    /// `phone_verified` drops to false and any pending code is cleared.
    pub async fn update(
        pool: &SqlitePool,
        user_id: &str,
        update: UpdateSmsPreferences,
    ) -> AppResult<SmsPreferences> {
        let current = Self::get_or_create(pool, user_id).await?;

        let enabled = update.enabled.unwrap_or(current.enabled);
        let phone_number = update.phone_number.unwrap_or(current.phone_number.clone());
        let phone_changed = phone_number != current.phone_number;

        let (phone_verified, verification_code, verification_expires) = if phone_changed {
            (false, None, None)
        } else {
            (
                current.phone_verified,
                current.verification_code,
                current.verification_expires,
            )
        };

        let categories = update.categories.unwrap_or_default();
        let watering_confirmation = categories
            .watering_confirmation
            .unwrap_or(current.watering_confirmation);
        let maintenance_reminders = categories
            .maintenance_reminders
            .unwrap_or(current.maintenance_reminders);
        let water_tank_alerts = categories
            .water_tank_alerts
            .unwrap_or(current.water_tank_alerts);
        let environmental_alerts = categories
            .environmental_alerts
            .unwrap_or(current.environmental_alerts);
        let weekly_pulse = categories.weekly_pulse.unwrap_or(current.weekly_pulse);

        let quiet = update.quiet_hours.unwrap_or_default();
        let quiet_hours_enabled = quiet.enabled.unwrap_or(current.quiet_hours_enabled);
        let quiet_hours_start = quiet.start.unwrap_or(current.quiet_hours_start);
        let quiet_hours_end = quiet.end.unwrap_or(current.quiet_hours_end);
        let quiet_hours_timezone = quiet.timezone.unwrap_or(current.quiet_hours_timezone);

        let now = Utc::now().naive_utc();
        let sql = format!(
            r#"
            UPDATE sms_preferences
            SET enabled = ?,
                phone_number = ?,
                phone_verified = ?,
                verification_code = ?,
                verification_expires = ?,
                watering_confirmation = ?,
                maintenance_reminders = ?,
                water_tank_alerts = ?,
                environmental_alerts = ?,
                weekly_pulse = ?,
                quiet_hours_enabled = ?,
                quiet_hours_start = ?,
                quiet_hours_end = ?,
                quiet_hours_timezone = ?,
                updated_at = ?
            WHERE user_id = ?
            RETURNING {COLUMNS}
            "#
        );

        sqlx::query_as::<_, SmsPreferences>(&sql)
            .bind(enabled)
            .bind(phone_number)
            .bind(phone_verified)
            .bind(verification_code)
            .bind(verification_expires)
            .bind(watering_confirmation)
            .bind(maintenance_reminders)
            .bind(water_tank_alerts)
            .bind(environmental_alerts)
            .bind(weekly_pulse)
            .bind(quiet_hours_enabled)
            .bind(quiet_hours_start)
            .bind(quiet_hours_end)
            .bind(quiet_hours_timezone)
            .bind(now)
            .bind(user_id)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Store a new verification challenge together with the number it is
    /// for. The number always starts unverified.
    pub async fn store_verification(
        pool: &SqlitePool,
        user_id: &str,
        phone_number: &str,
        code_hash: &str,
        expires_at: NaiveDateTime,
    ) -> AppResult<SmsPreferences> {
        Self::get_or_create(pool, user_id).await?;

        let now = Utc::now().naive_utc();
        let sql = format!(
            r#"
            UPDATE sms_preferences
            SET phone_number = ?,
                phone_verified = 0,
                verification_code = ?,
                verification_expires = ?,
                updated_at = ?
            WHERE user_id = ?
            RETURNING {COLUMNS}
            "#
        );

        sqlx::query_as::<_, SmsPreferences>(&sql)
            .bind(phone_number)
            .bind(code_hash)
            .bind(expires_at)
            .bind(now)
            .bind(user_id)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn mark_phone_verified(
        pool: &SqlitePool,
        user_id: &str,
    ) -> AppResult<SmsPreferences> {
        let now = Utc::now().naive_utc();
        let sql = format!(
            r#"
            UPDATE sms_preferences
            SET phone_verified = 1,
                verification_code = NULL,
                verification_expires = NULL,
                updated_at = ?
            WHERE user_id = ?
            RETURNING {COLUMNS}
            "#
        );

        sqlx::query_as::<_, SmsPreferences>(&sql)
            .bind(now)
            .bind(user_id)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Bump the daily counter after a confirmed send. The counter rolls over
    /// per UTC calendar day: a reset stamp from an earlier day restarts the
    /// count at 1 instead of incrementing a stale value.
    pub async fn record_send(
        pool: &SqlitePool,
        user_id: &str,
        now: NaiveDateTime,
    ) -> AppResult<SmsPreferences> {
        let sql = format!(
            r#"
            UPDATE sms_preferences
            SET daily_sms_count = CASE
                    WHEN last_count_reset IS NOT NULL AND date(last_count_reset) = date(?)
                        THEN daily_sms_count + 1
                    ELSE 1
                END,
                last_count_reset = ?,
                last_sms_at = ?,
                updated_at = ?
            WHERE user_id = ?
            RETURNING {COLUMNS}
            "#
        );

        sqlx::query_as::<_, SmsPreferences>(&sql)
            .bind(now)
            .bind(now)
            .bind(now)
            .bind(now)
            .bind(user_id)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Flip the master switch for every row matching a phone number. Used by
    /// the inbound STOP/START webhook, which only knows the sender's number.
    /// Returns how many rows matched.
    pub async fn set_enabled_by_phone(
        pool: &SqlitePool,
        phone_number: &str,
        enabled: bool,
    ) -> AppResult<u64> {
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            UPDATE sms_preferences
            SET enabled = ?, updated_at = ?
            WHERE phone_number = ?
            "#,
        )
        .bind(enabled)
        .bind(now)
        .bind(phone_number)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }
}
