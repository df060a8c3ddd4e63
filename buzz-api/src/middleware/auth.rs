//! JWT authentication and role checks
//!
//! The engine trusts an external identity provider: tokens are minted
//! elsewhere with the shared secret and validated here into an
//! [`AuthContext`]. Only validation and role checks live in this service;
//! signup, login and password storage are out of scope.

use axum::http::{header, HeaderMap};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// Caller roles carried in the token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Business,
    Admin,
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    pub role: Role,
    /// Business the caller operates, for role `business`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_id: Option<String>,
    /// Expiration time
    pub exp: usize,
    /// Issued at
    pub iat: usize,
    /// JWT id
    pub jti: String,
}

/// Authenticated request context resolved from the bearer token
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
    pub business_id: Option<Uuid>,
}

impl AuthContext {
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(ApiError::Forbidden("Admin role required".to_string()))
        }
    }

    /// The business id claim, for role `business`
    pub fn require_business(&self) -> Result<Uuid, ApiError> {
        match (self.role, self.business_id) {
            (Role::Business, Some(id)) => Ok(id),
            _ => Err(ApiError::Forbidden("Business role required".to_string())),
        }
    }
}

/// Authentication service handling JWT operations
pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthService {
    pub fn new() -> Self {
        let secret = std::env::var("JWT_SECRET")
            .unwrap_or_else(|_| "default_secret_change_in_production".to_string());

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Mint a bearer token. Used by tests and operational tooling; user
    /// tokens normally come from the identity provider sharing the secret.
    pub fn generate_token(
        &self,
        user_id: Uuid,
        role: Role,
        business_id: Option<Uuid>,
    ) -> Result<String, ApiError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            business_id: business_id.map(|id| id.to_string()),
            exp: (now + Duration::hours(24)).timestamp() as usize,
            iat: now.timestamp() as usize,
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ApiError::Unauthorized(format!("Failed to generate token: {}", e)))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, ApiError> {
        let validation = Validation::new(Algorithm::HS256);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| ApiError::Unauthorized(format!("Invalid token: {}", e)))
    }

    /// Resolve the `Authorization: Bearer` header into an auth context
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, ApiError> {
        let header_value = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing authorization header".to_string()))?;

        let token = header_value.strip_prefix("Bearer ").ok_or_else(|| {
            ApiError::Unauthorized("Invalid authorization header format".to_string())
        })?;

        let claims = self.validate_token(token)?;

        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ApiError::Unauthorized("Invalid subject claim".to_string()))?;

        let business_id = match &claims.business_id {
            Some(raw) => Some(
                Uuid::parse_str(raw)
                    .map_err(|_| ApiError::Unauthorized("Invalid business claim".to_string()))?,
            ),
            None => None,
        };

        Ok(AuthContext {
            user_id,
            role: claims.role,
            business_id,
        })
    }
}

impl Default for AuthService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_token(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[test]
    fn token_round_trips_into_auth_context() {
        let auth = AuthService::new();
        let user_id = Uuid::new_v4();
        let business_id = Uuid::new_v4();

        let token = auth
            .generate_token(user_id, Role::Business, Some(business_id))
            .unwrap();
        let ctx = auth.authenticate(&headers_with_token(&token)).unwrap();

        assert_eq!(ctx.user_id, user_id);
        assert_eq!(ctx.role, Role::Business);
        assert_eq!(ctx.business_id, Some(business_id));
    }

    #[test]
    fn tampered_token_is_rejected() {
        let auth = AuthService::new();
        let token = auth
            .generate_token(Uuid::new_v4(), Role::User, None)
            .unwrap();

        let mut tampered = token.clone();
        tampered.pop();
        tampered.push(if token.ends_with('A') { 'B' } else { 'A' });

        assert!(auth.authenticate(&headers_with_token(&tampered)).is_err());
    }

    #[test]
    fn missing_and_malformed_headers_are_unauthorized() {
        let auth = AuthService::new();

        assert!(matches!(
            auth.authenticate(&HeaderMap::new()),
            Err(ApiError::Unauthorized(_))
        ));

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Token abc"),
        );
        assert!(matches!(
            auth.authenticate(&headers),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn role_checks() {
        let admin = AuthContext {
            user_id: Uuid::new_v4(),
            role: Role::Admin,
            business_id: None,
        };
        assert!(admin.require_admin().is_ok());
        assert!(admin.require_business().is_err());

        let business = AuthContext {
            user_id: Uuid::new_v4(),
            role: Role::Business,
            business_id: Some(Uuid::new_v4()),
        };
        assert!(business.require_admin().is_err());
        assert_eq!(
            business.require_business().unwrap(),
            business.business_id.unwrap()
        );

        let user = AuthContext {
            user_id: Uuid::new_v4(),
            role: Role::User,
            business_id: None,
        };
        assert!(user.require_admin().is_err());
        assert!(user.require_business().is_err());
    }
}
