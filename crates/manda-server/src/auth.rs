//! Bearer token validation for REST and WebSocket clients.

use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use manda_db::User;

use crate::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtManager {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Signs a token for `user` valid for `ttl_secs`.
    pub fn issue(&self, user: &User, ttl_secs: i64) -> Result<String, jsonwebtoken::errors::Error> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            iat: now,
            exp: now + ttl_secs,
        };

        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
    }

    /// Checks signature and expiry.
    pub fn validate(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &Validation::default())?;
        Ok(data.claims)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// The bearer token from the `Authorization` header, falling back to the
/// `token` query parameter. Browsers cannot set headers on WebSocket
/// handshakes, so the query form is accepted with or without `Bearer `.
pub fn bearer_token(headers: &HeaderMap, query: &TokenQuery) -> Option<String> {
    if let Some(value) = headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok()) {
        return value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
    }

    let token = query.token.as_deref()?.trim();
    let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Resolves `token` to a stored user whose id and email match its claims.
pub async fn authenticate(state: &AppState, token: &str) -> ApiResult<User> {
    let claims = state.jwt.validate(token).map_err(|e| {
        debug!(error = %e, "Rejected bearer token");
        ApiError::Unauthorized("Invalid or expired token".into())
    })?;

    let user = state
        .worker
        .db()
        .get_user(&claims.sub)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Unknown user".into()))?;

    if user.email != claims.email {
        return Err(ApiError::Unauthorized("Token does not match user".into()));
    }

    Ok(user)
}

/// The authenticated caller of a REST handler.
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> ApiResult<Self> {
        let query = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .map(|Query(q)| q)
            .unwrap_or_default();

        let token = bearer_token(&parts.headers, &query)
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".into()))?;

        Ok(AuthUser(authenticate(state, &token).await?))
    }
}
