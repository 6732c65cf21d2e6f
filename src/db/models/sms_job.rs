use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle of a delivery job.
///
/// A job is inserted as `Pending` before the transport call and moves to
/// exactly one terminal state on the synchronous result. The one exception
/// is a carrier refinement: an `undelivered` status callback may downgrade
/// an optimistic `Sent` to `Failed`. Nothing ever moves a job back to
/// `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmsJobStatus {
    Pending,
    Sent,
    Failed,
}

impl SmsJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmsJobStatus::Pending => "pending",
            SmsJobStatus::Sent => "sent",
            SmsJobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SmsJobStatus::Pending),
            "sent" => Some(SmsJobStatus::Sent),
            "failed" => Some(SmsJobStatus::Failed),
            _ => None,
        }
    }
}

/// One SMS handed to the transport.
///
/// The row is the audit record of a single delivery: what was sent, to
/// which number, the synchronous outcome, and the carrier correlation id
/// (`twilio_message_sid`) that later status callbacks reconcile against.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SmsJob {
    /// Primary key (UUID)
    pub id: String,

    /// Owning user id (platform identity, not a local table reference).
    pub user_id: String,

    /// Farm the notification is about, when there is one.
    pub farm_id: Option<String>,

    /// Notification type (e.g. 'tank_low', 'watering', ...)
    pub notification_type: String,

    /// The rendered message body exactly as handed to the transport.
    pub message: String,

    /// Destination number at the time the job was created.
    pub phone_number: String,

    /// 'pending', 'sent' or 'failed'. See [`SmsJobStatus`].
    pub status: String,

    /// Transport attempts made so far.
    pub attempts: i32,

    /// Attempts allowed before the job is considered spent.
    pub max_attempts: i32,

    pub scheduled_for: NaiveDateTime,
    pub sent_at: Option<NaiveDateTime>,
    pub failed_at: Option<NaiveDateTime>,

    /// Carrier error text, preserved verbatim.
    pub error_message: Option<String>,

    /// Twilio message sid, set once the API accepts the message.
    pub twilio_message_sid: Option<String>,

    pub created_at: NaiveDateTime,
}

/// Data required to create a new delivery job. `max_attempts` defaults in
/// the repository when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSmsJob {
    pub user_id: String,
    pub farm_id: Option<String>,
    pub notification_type: String,
    pub message: String,
    pub phone_number: String,
    pub max_attempts: Option<i32>,
}
