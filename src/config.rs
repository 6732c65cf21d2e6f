use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub twilio: TwilioConfig,
    pub sms: SmsConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
    /// Public base URL of this service as seen by Twilio. Used to rebuild
    /// the full request URL when validating webhook signatures.
    pub webhook_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from_number: Option<String>,
    /// When set, every outbound SMS is redirected to this number. Meant for
    /// staging environments that talk to the real Twilio API.
    pub recipient_override: Option<String>,
    /// Passed as StatusCallback on outbound messages when set.
    pub status_callback_url: Option<String>,
    /// Verify the X-Twilio-Signature header on incoming webhooks.
    pub validate_signatures: bool,
    pub request_timeout_secs: u64,
}

impl TwilioConfig {
    /// Credentials are all-or-nothing; anything less runs the mock transport.
    pub fn credentials(&self) -> Option<(&str, &str, &str)> {
        match (&self.account_sid, &self.auth_token, &self.from_number) {
            (Some(sid), Some(token), Some(from)) => {
                Some((sid.as_str(), token.as_str(), from.as_str()))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmsConfig {
    /// Maximum SMS messages delivered to a single user per UTC day.
    pub daily_limit: u32,
    /// Attempts recorded on a delivery job before it is considered spent.
    pub max_attempts: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for the verification-code endpoints
    pub verify_per_second: u32,
    /// Burst size for the verification-code endpoints
    pub verify_burst: u32,
    /// Allowed requests per second (per IP) for webhook endpoints (e.g. /webhooks/twilio)
    pub webhook_per_second: u32,
    /// Burst size for webhook endpoints
    pub webhook_burst: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "3001".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
                webhook_url: env::var("WEBHOOK_URL")
                    .unwrap_or_else(|_| "http://localhost:3001".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/plante_notifications.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("JWT_SECRET".to_string()))?,
            },
            twilio: TwilioConfig {
                account_sid: env::var("TWILIO_ACCOUNT_SID").ok(),
                auth_token: env::var("TWILIO_AUTH_TOKEN").ok(),
                from_number: env::var("TWILIO_FROM_NUMBER").ok(),
                recipient_override: env::var("TWILIO_RECIPIENT_OVERRIDE").ok(),
                status_callback_url: env::var("TWILIO_STATUS_CALLBACK_URL").ok(),
                validate_signatures: match env::var("TWILIO_VALIDATE_SIGNATURES") {
                    Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
                    Err(_) => false,
                },
                request_timeout_secs: env::var("TWILIO_REQUEST_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .map_err(|_| {
                        ConfigError::InvalidValue("TWILIO_REQUEST_TIMEOUT_SECS".to_string())
                    })?,
            },
            sms: SmsConfig {
                daily_limit: env::var("TWILIO_DAILY_LIMIT")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("TWILIO_DAILY_LIMIT".to_string()))?,
                max_attempts: env::var("SMS_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("SMS_MAX_ATTEMPTS".to_string()))?,
            },
            rate_limit: RateLimitConfig {
                verify_per_second: env::var("RATE_LIMIT_VERIFY_PER_SECOND")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()
                    .unwrap_or(1),
                verify_burst: env::var("RATE_LIMIT_VERIFY_BURST")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .unwrap_or(3),
                webhook_per_second: env::var("RATE_LIMIT_WEBHOOKS_PER_SECOND")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                webhook_burst: env::var("RATE_LIMIT_WEBHOOKS_BURST")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .unwrap_or(50),
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3001,
                frontend_url: "http://localhost:3000".to_string(),
                webhook_url: "http://localhost:3001".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/plante_notifications.db".to_string(),
                max_connections: 5,
            },
            jwt: JwtConfig {
                secret: String::new(),
            },
            twilio: TwilioConfig {
                account_sid: None,
                auth_token: None,
                from_number: None,
                recipient_override: None,
                status_callback_url: None,
                validate_signatures: false,
                request_timeout_secs: 10,
            },
            sms: SmsConfig {
                daily_limit: 50,
                max_attempts: 3,
            },
            rate_limit: RateLimitConfig {
                verify_per_second: 1,
                verify_burst: 3,
                webhook_per_second: 10,
                webhook_burst: 50,
            },
        }
    }
}
