use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::config::JwtConfig;
use crate::error::{AppError, AppResult};

/// Claims of an access token minted by the hosted auth provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub iat: Option<usize>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub email: Option<String>,
}

pub struct AuthService;

impl AuthService {
    /// Verify an HS256 bearer token and return its claims.
    pub fn decode_jwt(config: &JwtConfig, token: &str) -> AppResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        match &config.audience {
            Some(aud) => validation.set_audience(&[aud.as_str()]),
            None => validation.validate_aud = false,
        }

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(config.secret.as_bytes()),
            &validation,
        )?;
        Ok(token_data.claims)
    }

    /// Turn a bearer token into a session. Anonymous tokens are refused.
    pub fn session_from_token(config: &JwtConfig, token: &str) -> AppResult<Session> {
        let claims = Self::decode_jwt(config, token)?;
        if claims.sub.is_empty() || claims.role.as_deref() == Some("anon") {
            return Err(AppError::Unauthorized);
        }
        Ok(Session {
            user_id: claims.sub,
            email: claims.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::*;

    fn config(audience: Option<&str>) -> JwtConfig {
        JwtConfig {
            secret: "test-secret".to_string(),
            audience: audience.map(str::to_string),
        }
    }

    fn token(sub: &str, role: Option<&str>, aud: Option<&str>, secret: &str) -> String {
        let mut claims = serde_json::json!({
            "sub": sub,
            "exp": (Utc::now() + Duration::hours(1)).timestamp(),
        });
        if let Some(role) = role {
            claims["role"] = role.into();
        }
        if let Some(aud) = aud {
            claims["aud"] = aud.into();
        }
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_yields_session() {
        let t = token("user-1", Some("authenticated"), Some("authenticated"), "test-secret");
        let session = AuthService::session_from_token(&config(None), &t).unwrap();
        assert_eq!(session.user_id, "user-1");
    }

    #[test]
    fn wrong_secret_or_audience_is_rejected() {
        let t = token("user-1", None, Some("other"), "wrong");
        assert!(AuthService::session_from_token(&config(None), &t).is_err());

        let t = token("user-1", None, Some("other"), "test-secret");
        assert!(AuthService::session_from_token(&config(Some("authenticated")), &t).is_err());
    }

    #[test]
    fn anon_role_is_unauthorized() {
        let t = token("user-1", Some("anon"), None, "test-secret");
        assert!(matches!(
            AuthService::session_from_token(&config(None), &t),
            Err(AppError::Unauthorized)
        ));
    }
}
