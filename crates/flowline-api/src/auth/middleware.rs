// Axum extractor for the authentication context

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::jwt::decode_token;
use super::AuthContext;
use crate::error::ApiError;

/// Shared auth settings, installed as a request extension
#[derive(Clone)]
pub struct AuthSettings {
    pub jwt_secret: Arc<String>,
}

impl AuthSettings {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        AuthSettings {
            jwt_secret: Arc::new(jwt_secret.into()),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let settings = parts
            .extensions
            .get::<AuthSettings>()
            .cloned()
            .ok_or_else(|| ApiError::internal("Auth settings not configured"))?;

        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Expected Bearer credential"))?;

        decode_token(token, &settings.jwt_secret)
    }
}
