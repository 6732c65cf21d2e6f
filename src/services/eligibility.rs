use chrono::{DateTime, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;

use crate::db::models::SmsPreferences;
use crate::services::sms::NotificationType;

// ============================================================================
// Eligibility evaluator
// ============================================================================
//
// Pure decision core: no I/O, no clock reads. `now` is threaded in by the
// caller so every rule is testable at a fixed instant.

/// Why a notification was not sent. Denials are expected outcomes, not
/// errors; the pipeline reports them as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    SmsDisabled,
    PhoneNotVerified,
    CategoryDisabled,
    QuietHoursActive,
    RateLimited,
}

impl Denial {
    pub fn as_str(&self) -> &'static str {
        match self {
            Denial::SmsDisabled => "sms_disabled",
            Denial::PhoneNotVerified => "phone_not_verified",
            Denial::CategoryDisabled => "category_disabled",
            Denial::QuietHoursActive => "quiet_hours_active",
            Denial::RateLimited => "rate_limited",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Denial::SmsDisabled => "SMS notifications disabled",
            Denial::PhoneNotVerified => "Phone number not verified",
            Denial::CategoryDisabled => "Notification type disabled by user",
            Denial::QuietHoursActive => "Quiet hours active",
            Denial::RateLimited => "Daily SMS limit reached",
        }
    }
}

/// The five user-facing toggles notification types map onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCategory {
    WateringConfirmation,
    MaintenanceReminders,
    WaterTankAlerts,
    EnvironmentalAlerts,
    WeeklyPulse,
}

impl NotificationType {
    /// Fixed mapping of types onto preference toggles. `verification` maps
    /// to no category: it must reach users who have everything off.
    pub fn category(&self) -> Option<NotificationCategory> {
        match self {
            NotificationType::Watering | NotificationType::FarmAction => {
                Some(NotificationCategory::WateringConfirmation)
            }
            NotificationType::Maintenance => Some(NotificationCategory::MaintenanceReminders),
            NotificationType::TankLow
            | NotificationType::TankCritical
            | NotificationType::TankEmpty => Some(NotificationCategory::WaterTankAlerts),
            NotificationType::TempHigh
            | NotificationType::TempLow
            | NotificationType::HumidityAlert => Some(NotificationCategory::EnvironmentalAlerts),
            NotificationType::WeeklyPulse => Some(NotificationCategory::WeeklyPulse),
            NotificationType::Verification => None,
        }
    }

    /// Critical types ignore quiet hours.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            NotificationType::TankEmpty | NotificationType::Verification
        )
    }
}

fn category_enabled(prefs: &SmsPreferences, category: NotificationCategory) -> bool {
    match category {
        NotificationCategory::WateringConfirmation => prefs.watering_confirmation,
        NotificationCategory::MaintenanceReminders => prefs.maintenance_reminders,
        NotificationCategory::WaterTankAlerts => prefs.water_tank_alerts,
        NotificationCategory::EnvironmentalAlerts => prefs.environmental_alerts,
        NotificationCategory::WeeklyPulse => prefs.weekly_pulse,
    }
}

/// Decide whether a notification may be sent right now.
///
/// Checks run in a fixed priority order, so a user with several reasons to
/// be skipped always sees the same one:
/// enablement, verification state, category, quiet hours, daily limit.
/// `verification` codes skip everything: they must be deliverable while the
/// phone is still unverified and are exempt from daily counting.
pub fn evaluate(
    prefs: &SmsPreferences,
    ntype: NotificationType,
    now: DateTime<Utc>,
    daily_limit: u32,
) -> Result<(), Denial> {
    if ntype == NotificationType::Verification {
        return Ok(());
    }

    if !prefs.enabled {
        return Err(Denial::SmsDisabled);
    }

    if !prefs.phone_verified {
        return Err(Denial::PhoneNotVerified);
    }

    if let Some(category) = ntype.category() {
        if !category_enabled(prefs, category) {
            return Err(Denial::CategoryDisabled);
        }
    }

    if !ntype.is_critical() && quiet_hours_active(prefs, now) {
        return Err(Denial::QuietHoursActive);
    }

    if is_rate_limited(prefs, now, daily_limit) {
        return Err(Denial::RateLimited);
    }

    Ok(())
}

/// Whether `now` falls inside the user's quiet-hours window.
///
/// The window is expressed as wall-clock minutes in the user's own zone and
/// may wrap midnight (start > end). Both ends behave half-open:
/// `[start, end)`. A timezone or time string that fails to parse disables
/// quiet hours for that evaluation (fail open) rather than blocking sends.
pub fn quiet_hours_active(prefs: &SmsPreferences, now: DateTime<Utc>) -> bool {
    if !prefs.quiet_hours_enabled {
        return false;
    }

    let tz: Tz = match prefs.quiet_hours_timezone.parse() {
        Ok(tz) => tz,
        Err(_) => {
            tracing::warn!(
                "Unknown quiet-hours timezone '{}' for user {}; treating quiet hours as inactive",
                prefs.quiet_hours_timezone,
                prefs.user_id
            );
            return false;
        }
    };

    let (start, end) = match (
        parse_hhmm(&prefs.quiet_hours_start),
        parse_hhmm(&prefs.quiet_hours_end),
    ) {
        (Some(start), Some(end)) => (start, end),
        _ => {
            tracing::warn!(
                "Unparseable quiet-hours window '{}'-'{}' for user {}; treating quiet hours as inactive",
                prefs.quiet_hours_start,
                prefs.quiet_hours_end,
                prefs.user_id
            );
            return false;
        }
    };

    let local = now.with_timezone(&tz);
    let current = local.hour() * 60 + local.minute();

    if start <= end {
        current >= start && current < end
    } else {
        // Window wraps midnight, e.g. 22:00-08:00.
        current >= start || current < end
    }
}

/// Minutes since midnight for an "HH:MM" string.
fn parse_hhmm(s: &str) -> Option<u32> {
    let t = NaiveTime::parse_from_str(s, "%H:%M").ok()?;
    Some(t.hour() * 60 + t.minute())
}

/// The counter only binds while its reset stamp is from today (UTC); a
/// stale stamp means the day rolled over and the counter is logically zero.
fn is_rate_limited(prefs: &SmsPreferences, now: DateTime<Utc>, daily_limit: u32) -> bool {
    let last_reset = match prefs.last_count_reset {
        Some(ts) => ts,
        None => return false,
    };

    if last_reset.date() != now.naive_utc().date() {
        return false;
    }

    prefs.daily_sms_count as i64 >= daily_limit as i64
}
