pub mod eligibility;
pub mod init;
pub mod sms;
pub mod templates;
pub mod twilio;
pub mod verification;
pub mod webhooks;
