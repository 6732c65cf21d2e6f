pub mod auth;
pub mod health;
pub mod notifications;
pub mod preferences;
pub mod verify;
pub mod webhooks;
