use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::AppState;

// Tokens are minted by the main Plante app; this service only verifies them
// against the shared secret.

/// Claims carried by a platform-issued JWT. `sub` is the platform user id.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Decode and validate a JWT, returning the claims
fn decode_jwt(state: &Arc<AppState>, token: &str) -> Result<Claims, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.config.jwt.secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Extractor for the authenticated user id
pub struct AuthUser(pub String);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        // Extract Authorization header (Bearer token)
        let auth_header = parts
            .headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                tracing::debug!("Missing or invalid Authorization header");
                AppError::Unauthorized
            })?;

        if !auth_header.to_ascii_lowercase().starts_with("bearer ") {
            tracing::debug!("Authorization header doesn't start with 'Bearer '");
            return Err(AppError::Unauthorized);
        }

        let token = auth_header[7..].trim();
        if token.is_empty() {
            tracing::debug!("Empty bearer token in Authorization header");
            return Err(AppError::Unauthorized);
        }

        let claims = decode_jwt(state, token).map_err(|e| {
            tracing::debug!("Token validation failed: {:?}", e);
            e
        })?;

        Ok(AuthUser(claims.sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, JwtConfig};
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_state(secret: &str) -> Arc<AppState> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let config = Config {
            jwt: JwtConfig {
                secret: secret.to_string(),
            },
            ..Default::default()
        };
        let transport = crate::services::twilio::build_transport(&config.twilio).unwrap();
        Arc::new(AppState {
            db: pool,
            config,
            transport,
        })
    }

    fn token(secret: &str, sub: &str, exp_offset_secs: i64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp: (Utc::now().timestamp() + exp_offset_secs) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    async fn extract(state: &Arc<AppState>, auth_header: Option<&str>) -> Result<String, AppError> {
        let mut builder = http::Request::builder().uri("/");
        if let Some(value) = auth_header {
            builder = builder.header(http::header::AUTHORIZATION, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        AuthUser::from_request_parts(&mut parts, state)
            .await
            .map(|AuthUser(user_id)| user_id)
    }

    #[tokio::test]
    async fn valid_bearer_token_yields_the_subject() {
        let state = test_state("test-secret").await;
        let token = token("test-secret", "user-42", 3600);

        let user_id = extract(&state, Some(&format!("Bearer {}", token)))
            .await
            .unwrap();
        assert_eq!(user_id, "user-42");
    }

    #[tokio::test]
    async fn missing_or_malformed_headers_are_unauthorized() {
        let state = test_state("test-secret").await;

        assert!(matches!(
            extract(&state, None).await,
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            extract(&state, Some("Basic abc")).await,
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            extract(&state, Some("Bearer ")).await,
            Err(AppError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn expired_and_forged_tokens_are_rejected() {
        let state = test_state("test-secret").await;

        let expired = token("test-secret", "user-42", -3600);
        assert!(matches!(
            extract(&state, Some(&format!("Bearer {}", expired))).await,
            Err(AppError::Jwt(_))
        ));

        let forged = token("other-secret", "user-42", 3600);
        assert!(matches!(
            extract(&state, Some(&format!("Bearer {}", forged))).await,
            Err(AppError::Jwt(_))
        ));
    }
}
