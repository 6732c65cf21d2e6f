use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SmsPreferences {
    pub id: String,
    pub user_id: String,

    pub enabled: bool,
    pub phone_number: String,
    pub phone_verified: bool,

    /// SHA-256 hex of the pending verification code, if one is outstanding.
    pub verification_code: Option<String>,
    pub verification_expires: Option<NaiveDateTime>,

    pub watering_confirmation: bool,
    pub maintenance_reminders: bool,
    pub water_tank_alerts: bool,
    pub environmental_alerts: bool,
    pub weekly_pulse: bool,

    pub quiet_hours_enabled: bool,
    /// "HH:MM" in the user's local timezone.
    pub quiet_hours_start: String,
    pub quiet_hours_end: String,
    /// IANA zone name, e.g. "America/New_York".
    pub quiet_hours_timezone: String,

    pub daily_sms_count: i32,
    pub last_sms_at: Option<NaiveDateTime>,
    pub last_count_reset: Option<NaiveDateTime>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Partial preferences update. Absent fields keep their current value;
/// nested sections merge field by field.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateSmsPreferences {
    #[serde(alias = "smsEnabled")]
    pub enabled: Option<bool>,
    #[serde(alias = "phoneNumber")]
    pub phone_number: Option<String>,
    pub categories: Option<UpdateSmsCategories>,
    #[serde(alias = "quietHours")]
    pub quiet_hours: Option<UpdateQuietHours>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateSmsCategories {
    #[serde(alias = "wateringConfirmation")]
    pub watering_confirmation: Option<bool>,
    #[serde(alias = "maintenanceReminders")]
    pub maintenance_reminders: Option<bool>,
    #[serde(alias = "waterTankAlerts")]
    pub water_tank_alerts: Option<bool>,
    #[serde(alias = "environmentalAlerts")]
    pub environmental_alerts: Option<bool>,
    #[serde(alias = "weeklyPulse")]
    pub weekly_pulse: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateQuietHours {
    pub enabled: Option<bool>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub timezone: Option<String>,
}

impl Default for SmsPreferences {
    fn default() -> Self {
        Self {
            id: String::new(),
            user_id: String::new(),
            enabled: false,
            phone_number: String::new(),
            phone_verified: false,
            verification_code: None,
            verification_expires: None,
            watering_confirmation: true,
            maintenance_reminders: true,
            water_tank_alerts: true,
            environmental_alerts: true,
            weekly_pulse: true,
            quiet_hours_enabled: false,
            quiet_hours_start: "22:00".to_string(),
            quiet_hours_end: "08:00".to_string(),
            quiet_hours_timezone: "America/New_York".to_string(),
            daily_sms_count: 0,
            last_sms_at: None,
            last_count_reset: None,
            created_at: Utc::now().naive_utc(),
            updated_at: Utc::now().naive_utc(),
        }
    }
}
