use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{distr::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::ApiJson;
use super::validation::{validate_email, validate_name, validate_optional_phone, validate_password};
use crate::config::AuthConfig;
use crate::db::{
    self, AuthResponse, ChangePasswordRequest, DbPool, LoginRequest, NewUser, RegisterRequest,
    Role, UpdateProfileRequest, User, UserResponse,
};
use crate::AppState;

/// JWT payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Internal user uuid
    pub sub: String,
    /// Public delegate id (`KMUN25xxx`)
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt_bytes: [u8; 16] = rand::rng().random();
    let salt = SaltString::encode_b64(&salt_bytes)?;
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

fn hash_or_500(password: &str) -> Result<String, ApiError> {
    hash_password(password).map_err(|e| {
        tracing::error!("Failed to hash password: {}", e);
        ApiError::internal("Failed to process password")
    })
}

/// Initial password handed to applicants whose account is created by a
/// registration submission
pub fn temp_password(first_name: &str) -> String {
    format!("Iam{}1!@#", first_name.trim())
}

/// Sign a token for `user` valid for the configured number of days
pub fn issue_token(config: &AuthConfig, user: &User) -> Result<String, ApiError> {
    let now = chrono::Utc::now();
    let claims = Claims {
        sub: user.id.clone(),
        user_id: user.user_id.clone(),
        email: user.email.clone(),
        role: user.role.clone(),
        iat: now.timestamp(),
        exp: (now + chrono::Duration::days(config.token_ttl_days)).timestamp(),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!("Failed to sign token: {}", e);
        ApiError::internal("Failed to issue token")
    })
}

/// Verify signature and expiry
pub fn decode_token(config: &AuthConfig, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
}

/// Extract the bearer token from request headers
fn extract_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve the active user behind the request's bearer token
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let token = extract_token(headers)
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    let claims = decode_token(&state.config.auth, token).map_err(|e| {
        tracing::debug!("Rejected token: {}", e);
        ApiError::unauthorized("Invalid or expired token")
    })?;

    let user = db::find_user_by_id(&state.db, &claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired token"))?;

    if !user.is_active {
        return Err(ApiError::unauthorized("Account is deactivated"));
    }

    Ok(user)
}

/// Auth middleware for protected routes; stores the user in request
/// extensions for the extractors below
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, request.headers()).await?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Extractor for the current authenticated user
#[async_trait]
impl FromRequestParts<Arc<AppState>> for User {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<User>() {
            return Ok(user.clone());
        }
        authenticate(state, &parts.headers).await
    }
}

/// Authenticated user holding any staff role
pub struct StaffUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for StaffUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = User::from_request_parts(parts, state).await?;
        if !user.role().is_staff() {
            return Err(ApiError::forbidden("Staff access required"));
        }
        Ok(StaffUser(user))
    }
}

/// Authenticated admin
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = User::from_request_parts(parts, state).await?;
        if !user.role().is_admin() {
            return Err(ApiError::forbidden("Admin access required"));
        }
        Ok(AdminUser(user))
    }
}

/// Create a delegate account
pub async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("firstName", validate_name("First name", &req.first_name))
        .check("lastName", validate_name("Last name", &req.last_name))
        .check("email", validate_email(&req.email))
        .check("password", validate_password(&req.password))
        .check("phone", validate_optional_phone(&req.phone));
    errors.finish()?;

    if db::find_user_by_email(&state.db, &req.email).await?.is_some() {
        return Err(ApiError::conflict("An account with this email already exists"));
    }

    let password_hash = hash_or_500(&req.password)?;
    let user_id = db::generate_user_id(&state.db).await?;

    let user = db::insert_user(
        &state.db,
        &NewUser {
            user_id,
            first_name: req.first_name,
            last_name: req.last_name,
            email: req.email,
            phone: req.phone.filter(|p| !p.trim().is_empty()),
            password_hash,
            role: Role::Delegate,
        },
    )
    .await?;

    tracing::info!(user_id = %user.user_id, email = %user.email, "User registered");

    let token = issue_token(&state.config.auth, &user)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            success: true,
            message: "Registration successful".to_string(),
            token,
            user: user.into(),
        }),
    ))
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user = db::find_user_by_email(&state.db, &req.email).await?;

    let Some(mut user) = user.filter(|u| verify_password(&req.password, &u.password_hash)) else {
        tracing::warn!(email = %req.email.trim(), "Failed login attempt");
        return Err(ApiError::unauthorized("Invalid credentials"));
    };

    if !user.is_active {
        tracing::warn!(user_id = %user.user_id, "Login attempt on deactivated account");
        return Err(ApiError::unauthorized("Account is deactivated"));
    }

    user.last_login = Some(db::touch_last_login(&state.db, &user.id).await?);
    let token = issue_token(&state.config.auth, &user)?;

    tracing::info!(user_id = %user.user_id, role = %user.role, "User logged in");

    Ok(Json(AuthResponse {
        success: true,
        message: "Login successful".to_string(),
        token,
        user: user.into(),
    }))
}

/// Tokens are stateless; the client discards its copy
pub async fn logout(user: User) -> Json<Value> {
    tracing::debug!(user_id = %user.user_id, "User logged out");
    Json(json!({ "success": true, "message": "Logged out" }))
}

pub async fn me(user: User) -> Json<Value> {
    Json(json!({ "success": true, "user": UserResponse::from(user) }))
}

pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    user: User,
    ApiJson(req): ApiJson<UpdateProfileRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(first) = &req.first_name {
        errors.check("firstName", validate_name("First name", first));
    }
    if let Some(last) = &req.last_name {
        errors.check("lastName", validate_name("Last name", last));
    }
    errors.check("phone", validate_optional_phone(&req.phone));
    errors.finish()?;

    let updated = db::update_user_profile(&state.db, &user.id, &req)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(json!({
        "success": true,
        "message": "Profile updated",
        "user": UserResponse::from(updated),
    })))
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    user: User,
    ApiJson(req): ApiJson<ChangePasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    if !verify_password(&req.current_password, &user.password_hash) {
        return Err(ApiError::validation_field(
            "currentPassword",
            "Current password is incorrect",
        ));
    }
    validate_password(&req.new_password)
        .map_err(|e| ApiError::validation_field("newPassword", e))?;

    let password_hash = hash_or_500(&req.new_password)?;
    db::update_user_password(&state.db, &user.id, &password_hash).await?;

    tracing::info!(user_id = %user.user_id, "Password changed");
    Ok(Json(json!({ "success": true, "message": "Password updated" })))
}

fn random_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect()
}

/// Make sure at least one admin account exists.
///
/// Uses the configured admin credentials; without a configured password a
/// random one is generated and logged once.
pub async fn ensure_admin_user(pool: &DbPool, config: &AuthConfig) -> anyhow::Result<()> {
    let (admins,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'admin'")
        .fetch_one(pool)
        .await?;
    if admins > 0 {
        return Ok(());
    }

    if db::find_user_by_email(pool, &config.admin_email)
        .await?
        .is_some()
    {
        anyhow::bail!(
            "admin email {} belongs to a non-admin account; set auth.admin_email to another address",
            config.admin_email
        );
    }

    let password = match &config.admin_password {
        Some(p) if !p.is_empty() => p.clone(),
        _ => {
            let generated = random_password();
            tracing::warn!(
                email = %config.admin_email,
                password = %generated,
                "No admin password configured; generated one for the initial admin account"
            );
            generated
        }
    };

    let password_hash = hash_password(&password)
        .map_err(|e| anyhow::anyhow!("failed to hash admin password: {}", e))?;
    let user_id = db::generate_user_id(pool).await?;

    db::insert_user(
        pool,
        &NewUser {
            user_id,
            first_name: "KMUN".to_string(),
            last_name: "Admin".to_string(),
            email: config.admin_email.clone(),
            phone: None,
            password_hash,
            role: Role::Admin,
        },
    )
    .await?;

    tracing::info!(email = %config.admin_email, "Created initial admin user");
    Ok(())
}
