//! Registration, login and logout.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_cookies::Cookies;
use tracing::info;
use uuid::Uuid;

use hearth_shared::constants::{
    PASSWORD_MAX_LEN, PASSWORD_MIN_LEN, USERNAME_MAX_LEN, USERNAME_MIN_LEN,
};
use hearth_shared::identity::Identity;

use crate::api::AppState;
use crate::error::ServerError;
use crate::session::{end_session, start_session, CurrentUser};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub message: String,
    pub user: PublicUser,
}

impl AuthResponse {
    fn new(message: &str, identity: &Identity) -> Self {
        Self {
            message: message.to_string(),
            user: PublicUser {
                id: identity.id,
                username: identity.username.clone(),
            },
        }
    }
}

/// `POST /api/auth/register`
pub async fn register(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ServerError> {
    validate_registration(&req)?;

    {
        let db = state.db.lock().await;
        if db.find_user_by_email(&req.email)?.is_some() {
            return Err(ServerError::Conflict(format!("Email {} is already registered", req.email)));
        }
        if db.find_user_by_username(&req.username)?.is_some() {
            return Err(ServerError::Conflict(format!("Username {} is already taken", req.username)));
        }
    }

    let hash = hash_password(req.password).await?;
    let user = state
        .db
        .lock()
        .await
        .create_user(&req.username, &req.email, &hash)?;
    let identity = user.identity();

    start_session(&cookies, &identity, &state.tokens, state.config.cookie_secure)?;
    info!(user = %identity.id, username = %identity.username, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse::new("Registration successful", &identity)),
    ))
}

/// `POST /api/auth/login`
pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ServerError> {
    let user = state
        .db
        .lock()
        .await
        .find_user_by_email(req.email.trim())?
        .ok_or_else(|| ServerError::NotFound(format!("No user registered with email {}", req.email)))?;

    if !verify_password(req.password, user.password_hash.clone()).await? {
        info!(user = %user.id, "Login rejected: wrong password");
        return Err(ServerError::Unauthenticated);
    }

    let identity = user.identity();
    start_session(&cookies, &identity, &state.tokens, state.config.cookie_secure)?;
    info!(user = %identity.id, "User logged in");

    Ok(Json(AuthResponse::new("Login successful", &identity)))
}

/// `POST /api/auth/logout`
pub async fn logout(cookies: Cookies) -> Json<serde_json::Value> {
    end_session(&cookies);
    Json(json!({ "message": "Logged out" }))
}

/// `GET /api/auth/me`
pub async fn me(CurrentUser(user): CurrentUser) -> Json<serde_json::Value> {
    Json(json!({ "user": user }))
}

fn validate_registration(req: &RegisterRequest) -> Result<(), ServerError> {
    let email = req.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ServerError::Validation("A valid email is required".into()));
    }

    let username_len = req.username.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&username_len) {
        return Err(ServerError::Validation(format!(
            "Username must be {USERNAME_MIN_LEN}-{USERNAME_MAX_LEN} characters"
        )));
    }

    let password = &req.password;
    let password_len = password.chars().count();
    if !(PASSWORD_MIN_LEN..=PASSWORD_MAX_LEN).contains(&password_len) {
        return Err(ServerError::Validation(format!(
            "Password must be {PASSWORD_MIN_LEN}-{PASSWORD_MAX_LEN} characters"
        )));
    }
    if !password.chars().any(|c| c.is_uppercase())
        || !password.chars().any(|c| c.is_ascii_digit())
        || !password.chars().any(|c| !c.is_alphanumeric())
    {
        return Err(ServerError::Validation(
            "Password needs an uppercase letter, a digit and a special character".into(),
        ));
    }

    if *password != req.confirm_password {
        return Err(ServerError::Validation("Passwords do not match".into()));
    }

    Ok(())
}

/// Argon2id PHC string. Runs on the blocking pool.
async fn hash_password(password: String) -> Result<String, ServerError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ServerError::Internal(format!("password hash error: {e}")))
    })
    .await
    .map_err(|e| ServerError::Internal(format!("hash task failed: {e}")))?
}

async fn verify_password(password: String, hash: String) -> Result<bool, ServerError> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&hash)
            .map_err(|e| ServerError::Internal(format!("invalid hash format: {e}")))?;
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(ServerError::Internal(format!("verify error: {e}"))),
        }
    })
    .await
    .map_err(|e| ServerError::Internal(format!("verify task failed: {e}")))?
}
