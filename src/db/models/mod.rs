//! Database models split into separate files.
//! This module re-exports individual model modules so imports like
//! `use crate::db::models::*;` work.

pub mod sms_job;
pub mod sms_preferences;

// Re-export all types at the `crate::db::models` namespace.
pub use self::sms_job::*;
pub use self::sms_preferences::*;
