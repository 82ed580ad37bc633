//! Email and password accounts: registration, login and the caller's profile.

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use manda_db::User;

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub user: User,
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, argon2::password_hash::Error> {
    let parsed = PasswordHash::new(hash)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Trimmed and lowercased, with something on both sides of the `@`.
fn normalize_email(email: &str) -> ApiResult<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(ApiError::BadRequest("email must be a valid address".into())),
    }
}

fn issue_for(state: &AppState, user: User) -> ApiResult<AuthResponse> {
    let access_token = state
        .jwt
        .issue(&user, state.token_ttl_secs)
        .map_err(|e| ApiError::Internal(format!("Failed to sign token: {e}")))?;
    Ok(AuthResponse { access_token, user })
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let email = normalize_email(&body.email)?;
    if body.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let name = body.name.as_deref().map(str::trim).filter(|n| !n.is_empty());

    let db = state.worker.db();
    if db.get_user_by_email(&email).await?.is_some() {
        return Err(ApiError::Conflict("Email already registered".into()));
    }

    let hash = hash_password(&body.password)
        .map_err(|e| ApiError::Internal(format!("Password hashing failed: {e}")))?;
    let user = db.create_user_with_password(&email, name, &hash).await?;
    info!(user_id = %user.id, "User registered");

    Ok((StatusCode::CREATED, Json(issue_for(&state, user)?)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let invalid = || ApiError::Unauthorized("Invalid credentials".into());
    let email = normalize_email(&body.email).map_err(|_| invalid())?;

    let db = state.worker.db();
    let user = db.get_user_by_email(&email).await?.ok_or_else(invalid)?;
    let hash = db.get_password_hash(&user.id).await?.ok_or_else(invalid)?;

    let valid = verify_password(&body.password, &hash).map_err(|e| {
        error!(user_id = %user.id, error = %e, "Stored password hash is unreadable");
        invalid()
    })?;
    if !valid {
        warn!(user_id = %user.id, "Failed login attempt");
        return Err(invalid());
    }

    info!(user_id = %user.id, "User logged in");
    Ok(Json(issue_for(&state, user)?))
}

pub async fn profile(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}
