pub mod sms_job;
pub mod sms_preferences;

pub use sms_job::SmsJobRepository;
pub use sms_preferences::SmsPreferencesRepository;
