// JWT token handling

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::{AuthContext, Role};
use crate::error::ApiError;

const JWT_ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// User id
    sub: String,
    tenant_id: String,
    role: String,
    /// Expiration, seconds since epoch
    exp: i64,
}

/// Decode and verify a bearer token into an AuthContext
pub fn decode_token(token: &str, secret: &str) -> Result<AuthContext, ApiError> {
    let mut validation = Validation::new(JWT_ALGORITHM);
    validation.set_required_spec_claims(&["sub", "exp"]);

    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| ApiError::unauthorized(format!("Invalid token: {e}")))?;

    let role = Role::from_str(&data.claims.role)
        .map_err(|e| ApiError::unauthorized(format!("Invalid token: {e}")))?;

    let exp = Utc
        .timestamp_opt(data.claims.exp, 0)
        .single()
        .ok_or_else(|| ApiError::unauthorized("Invalid token: bad expiration"))?;

    Ok(AuthContext {
        user_id: data.claims.sub,
        tenant_id: data.claims.tenant_id,
        role,
        exp,
    })
}

/// Mint a token. Used by tests and local development.
pub fn create_token(
    user_id: &str,
    tenant_id: &str,
    role: Role,
    exp: DateTime<Utc>,
    secret: &str,
) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id.to_string(),
        tenant_id: tenant_id.to_string(),
        role: role.as_str().to_string(),
        exp: exp.timestamp(),
    };

    jsonwebtoken::encode(
        &Header::new(JWT_ALGORITHM),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::internal(format!("Failed to mint token: {e}")))
}
