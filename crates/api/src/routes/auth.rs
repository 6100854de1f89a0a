//! Registration and login

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courtside_shared::types::User;

use crate::auth::{hash_password, verify_password};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub locale: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
}

/// Create a new member account
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<Json<AuthResponse>> {
    if !state.config.enable_signup {
        return Err(ApiError::Forbidden);
    }

    if req.username.is_empty() || req.username.len() > 30 {
        return Err(ApiError::Validation(
            "Username must be 1-30 characters".to_string(),
        ));
    }
    if !req.email.contains('@') {
        return Err(ApiError::Validation("Invalid email address".to_string()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }

    let password_hash =
        hash_password(&req.password).map_err(|e| ApiError::Validation(e.to_string()))?;

    let locale = req.locale.unwrap_or_else(|| "en".to_string());

    let user: User = sqlx::query_as(
        r#"
        INSERT INTO users (id, username, email, password_hash, locale)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&req.username)
    .bind(req.email.to_lowercase())
    .bind(&password_hash)
    .bind(&locale)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.code().as_deref() == Some("23505") {
                return if db_err.message().contains("username") {
                    ApiError::UsernameAlreadyExists
                } else {
                    ApiError::EmailAlreadyExists
                };
            }
        }
        ApiError::from(e)
    })?;

    tracing::info!(user_id = %user.id, username = %user.username, "User registered");

    issue_response(&state, &user)
}

/// Exchange credentials for a bearer token
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(req.email.to_lowercase())
        .fetch_optional(&state.pool)
        .await?;

    let user = user.ok_or(ApiError::InvalidCredentials)?;

    let valid = verify_password(&req.password, &user.password_hash)
        .map_err(|_| ApiError::InvalidCredentials)?;
    if !valid {
        return Err(ApiError::InvalidCredentials);
    }

    tracing::info!(user_id = %user.id, "User logged in");

    issue_response(&state, &user)
}

fn issue_response(state: &AppState, user: &User) -> ApiResult<Json<AuthResponse>> {
    let role = serde_json::to_value(user.role)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "member".to_string());

    let token = state.jwt.issue(user.id, &user.email, &role).map_err(|e| {
        tracing::error!(error = %e, "Token issuance failed");
        ApiError::Internal
    })?;

    Ok(Json(AuthResponse {
        token,
        user_id: user.id,
        username: user.username.clone(),
        email: user.email.clone(),
        role,
    }))
}
