use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::{SmsJobRepository, SmsJobStatus, SmsPreferencesRepository};
use crate::error::AppResult;
use crate::services::twilio::mask_phone_number;

/// Fields of interest from a Twilio delivery status callback.
#[derive(Debug, Clone)]
pub struct StatusCallback {
    pub message_sid: String,
    pub message_status: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl StatusCallback {
    /// Pull the relevant fields out of a decoded form body. Twilio uses
    /// `MessageSid`/`MessageStatus` on current API versions and the legacy
    /// `SmsSid`/`SmsStatus` names on older ones.
    pub fn from_params(params: &[(String, String)]) -> Option<Self> {
        let get = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };

        let message_sid = get("MessageSid").or_else(|| get("SmsSid"))?;
        let message_status = get("MessageStatus").or_else(|| get("SmsStatus"))?;

        Some(Self {
            message_sid,
            message_status,
            error_code: get("ErrorCode"),
            error_message: get("ErrorMessage"),
        })
    }

    /// Provider error text for the job row, "code: message" when both parts
    /// are present.
    pub fn error_text(&self) -> Option<String> {
        match (&self.error_code, &self.error_message) {
            (Some(code), Some(message)) => Some(format!("{}: {}", code, message)),
            (Some(code), None) => Some(code.clone()),
            (None, Some(message)) => Some(message.clone()),
            (None, None) => None,
        }
    }
}

/// An inbound SMS from a handset, e.g. a STOP reply.
#[derive(Debug, Clone)]
pub struct InboundSms {
    pub from: String,
    pub body: String,
}

impl InboundSms {
    pub fn from_params(params: &[(String, String)]) -> Option<Self> {
        let get = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };

        Some(Self {
            from: get("From")?,
            body: get("Body")?,
        })
    }
}

/// Carrier-mandated opt-out/opt-in keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundCommand {
    OptOut,
    OptIn,
}

pub struct TwilioWebhookService;

impl TwilioWebhookService {
    /// Map a Twilio message status onto a job transition. Intermediate
    /// statuses ("queued", "sending", "accepted") and anything unrecognized
    /// map to no transition.
    pub fn map_twilio_status(status: &str) -> Option<SmsJobStatus> {
        match status {
            "sent" | "delivered" => Some(SmsJobStatus::Sent),
            "failed" | "undelivered" => Some(SmsJobStatus::Failed),
            _ => None,
        }
    }

    /// Whole-body keyword match, case-insensitive, surrounding whitespace
    /// ignored. "STOP please" is not a command.
    pub fn parse_inbound_command(body: &str) -> Option<InboundCommand> {
        match body.trim().to_uppercase().as_str() {
            "STOP" | "STOPALL" | "UNSUBSCRIBE" | "CANCEL" | "END" | "QUIT" => {
                Some(InboundCommand::OptOut)
            }
            "START" | "YES" | "UNSTOP" => Some(InboundCommand::OptIn),
            _ => None,
        }
    }

    /// Apply a delivery status callback to the matching job, if any
    /// transition is due. Repeats and out-of-order callbacks are no-ops.
    pub async fn process_status_callback(
        pool: &SqlitePool,
        callback: &StatusCallback,
    ) -> AppResult<()> {
        let status = match Self::map_twilio_status(&callback.message_status) {
            Some(status) => status,
            None => {
                tracing::debug!(
                    "Ignoring Twilio status '{}' for {} (no job transition)",
                    callback.message_status,
                    callback.message_sid
                );
                return Ok(());
            }
        };

        let reconciled = SmsJobRepository::reconcile_by_message_sid(
            pool,
            &callback.message_sid,
            status,
            callback.error_text(),
            Utc::now().naive_utc(),
        )
        .await?;

        match reconciled {
            Some(job) => {
                tracing::info!(
                    "Job {} reconciled to '{}' from Twilio callback {}",
                    job.id,
                    job.status,
                    callback.message_sid
                );
            }
            None => {
                tracing::debug!(
                    "Status callback {} ('{}') matched no pending transition",
                    callback.message_sid,
                    callback.message_status
                );
            }
        }

        Ok(())
    }

    /// Handle an inbound reply. STOP-family keywords disable SMS for every
    /// account registered to the sending number; START-family re-enable.
    /// Anything else is ignored.
    pub async fn process_inbound_sms(pool: &SqlitePool, inbound: &InboundSms) -> AppResult<()> {
        let command = match Self::parse_inbound_command(&inbound.body) {
            Some(command) => command,
            None => {
                tracing::debug!(
                    "Inbound SMS from {} carried no recognized keyword",
                    mask_phone_number(&inbound.from)
                );
                return Ok(());
            }
        };

        let enabled = command == InboundCommand::OptIn;
        let updated =
            SmsPreferencesRepository::set_enabled_by_phone(pool, &inbound.from, enabled).await?;

        tracing::info!(
            "Inbound {} from {} updated {} preference row(s)",
            if enabled { "opt-in" } else { "opt-out" },
            mask_phone_number(&inbound.from),
            updated
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{CreateSmsJob, UpdateSmsPreferences};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn status_mapping_follows_twilio_semantics() {
        use TwilioWebhookService as S;

        assert_eq!(S::map_twilio_status("sent"), Some(SmsJobStatus::Sent));
        assert_eq!(S::map_twilio_status("delivered"), Some(SmsJobStatus::Sent));
        assert_eq!(S::map_twilio_status("failed"), Some(SmsJobStatus::Failed));
        assert_eq!(
            S::map_twilio_status("undelivered"),
            Some(SmsJobStatus::Failed)
        );
        assert_eq!(S::map_twilio_status("queued"), None);
        assert_eq!(S::map_twilio_status("sending"), None);
        assert_eq!(S::map_twilio_status("accepted"), None);
        assert_eq!(S::map_twilio_status("read"), None);
        assert_eq!(S::map_twilio_status(""), None);
    }

    #[test]
    fn keyword_parsing_is_forgiving_about_case_and_whitespace() {
        use TwilioWebhookService as S;

        let opt_outs = [
            "STOP",
            "stop",
            " Stop ",
            "STOPALL",
            "unsubscribe",
            "CANCEL",
            "End",
            "quit",
        ];
        for body in opt_outs {
            assert_eq!(
                S::parse_inbound_command(body),
                Some(InboundCommand::OptOut),
                "{body}"
            );
        }
        for body in ["START", "yes", " Unstop "] {
            assert_eq!(
                S::parse_inbound_command(body),
                Some(InboundCommand::OptIn),
                "{body}"
            );
        }
        for body in ["", "hello", "STOP please", "YES!"] {
            assert_eq!(S::parse_inbound_command(body), None, "{body:?}");
        }
    }

    #[test]
    fn callback_parsing_accepts_legacy_field_names() {
        let current = StatusCallback::from_params(&params(&[
            ("MessageSid", "SM1"),
            ("MessageStatus", "delivered"),
        ]))
        .unwrap();
        assert_eq!(current.message_sid, "SM1");
        assert_eq!(current.message_status, "delivered");

        let legacy = StatusCallback::from_params(&params(&[
            ("SmsSid", "SM2"),
            ("SmsStatus", "failed"),
            ("ErrorCode", "30003"),
        ]))
        .unwrap();
        assert_eq!(legacy.message_sid, "SM2");
        assert_eq!(legacy.error_code.as_deref(), Some("30003"));

        assert!(StatusCallback::from_params(&params(&[("MessageStatus", "sent")])).is_none());
    }

    #[test]
    fn error_text_combines_code_and_message() {
        let cb = |code: Option<&str>, message: Option<&str>| StatusCallback {
            message_sid: "SM1".to_string(),
            message_status: "failed".to_string(),
            error_code: code.map(str::to_string),
            error_message: message.map(str::to_string),
        };

        assert_eq!(
            cb(Some("30003"), Some("Unreachable handset")).error_text(),
            Some("30003: Unreachable handset".to_string())
        );
        assert_eq!(
            cb(Some("30003"), None).error_text(),
            Some("30003".to_string())
        );
        assert_eq!(
            cb(None, Some("Unreachable handset")).error_text(),
            Some("Unreachable handset".to_string())
        );
        assert_eq!(cb(None, None).error_text(), None);
    }

    #[tokio::test]
    async fn undelivered_callback_downgrades_a_sent_job() {
        let pool = test_pool().await;
        let now = Utc::now().naive_utc();

        let job = SmsJobRepository::create(
            &pool,
            CreateSmsJob {
                user_id: "user-1".to_string(),
                farm_id: None,
                notification_type: "watering".to_string(),
                message: "hi".to_string(),
                phone_number: "+15550001111".to_string(),
                max_attempts: None,
            },
            now,
        )
        .await
        .unwrap();
        SmsJobRepository::mark_sent(&pool, &job.id, "SM_CB", now)
            .await
            .unwrap();

        let callback = StatusCallback::from_params(&params(&[
            ("MessageSid", "SM_CB"),
            ("MessageStatus", "undelivered"),
            ("ErrorCode", "30005"),
        ]))
        .unwrap();
        TwilioWebhookService::process_status_callback(&pool, &callback)
            .await
            .unwrap();

        let job = SmsJobRepository::find_by_id(&pool, &job.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.status, SmsJobStatus::Failed.as_str());
        assert_eq!(job.error_message.as_deref(), Some("30005"));

        // Replaying the same callback changes nothing further.
        TwilioWebhookService::process_status_callback(&pool, &callback)
            .await
            .unwrap();
        let again = SmsJobRepository::find_by_id(&pool, &job.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.failed_at, job.failed_at);
    }

    #[tokio::test]
    async fn unknown_sid_callbacks_are_ignored() {
        let pool = test_pool().await;
        let callback = StatusCallback {
            message_sid: "SM_NOPE".to_string(),
            message_status: "delivered".to_string(),
            error_code: None,
            error_message: None,
        };
        // No matching job; still succeeds.
        TwilioWebhookService::process_status_callback(&pool, &callback)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stop_and_start_toggle_by_phone_number() {
        let pool = test_pool().await;
        SmsPreferencesRepository::update(
            &pool,
            "user-1",
            UpdateSmsPreferences {
                enabled: Some(true),
                phone_number: Some("+15550001111".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        TwilioWebhookService::process_inbound_sms(
            &pool,
            &InboundSms {
                from: "+15550001111".to_string(),
                body: "Stop".to_string(),
            },
        )
        .await
        .unwrap();
        let prefs = SmsPreferencesRepository::get_or_create(&pool, "user-1")
            .await
            .unwrap();
        assert!(!prefs.enabled);

        TwilioWebhookService::process_inbound_sms(
            &pool,
            &InboundSms {
                from: "+15550001111".to_string(),
                body: "START".to_string(),
            },
        )
        .await
        .unwrap();
        let prefs = SmsPreferencesRepository::get_or_create(&pool, "user-1")
            .await
            .unwrap();
        assert!(prefs.enabled);

        // A reply that is not a keyword leaves everything untouched.
        TwilioWebhookService::process_inbound_sms(
            &pool,
            &InboundSms {
                from: "+15550001111".to_string(),
                body: "thanks!".to_string(),
            },
        )
        .await
        .unwrap();
        let prefs = SmsPreferencesRepository::get_or_create(&pool, "user-1")
            .await
            .unwrap();
        assert!(prefs.enabled);
    }
}
