use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use porchlight_db::models::UserRow;
use porchlight_db::{StoreError, format_timestamp};
use porchlight_types::api::{
    Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse,
};
use porchlight_types::models::UserRole;

use crate::error::{ApiError, join_error};
use crate::state::AppState;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.phone.is_none() && req.email.is_none() {
        return Err(ApiError::Validation(
            "contact: at least one of phone or email is required".to_string(),
        ));
    }
    if req.display_name.trim().is_empty() {
        return Err(ApiError::Validation("displayName: must not be blank".to_string()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Validation(
            "password: must be at least 8 characters".to_string(),
        ));
    }
    if req.role == UserRole::Admin {
        return Err(ApiError::BusinessRule(
            "admin accounts cannot be self-registered".to_string(),
        ));
    }

    // Pre-check both contact columns; the unique indexes remain the
    // backstop under races.
    let db = state.clone();
    let email = req.email.clone();
    let phone = req.phone.clone();
    let taken = tokio::task::spawn_blocking(move || -> Result<bool, StoreError> {
        if let Some(email) = email.as_deref() {
            if db.db.find_user_by_email(email)?.is_some() {
                return Ok(true);
            }
        }
        if let Some(phone) = phone.as_deref() {
            if db.db.find_user_by_phone(phone)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    })
    .await
    .map_err(join_error)??;
    if taken {
        return Err(ApiError::Conflict("phone or email already registered".to_string()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {e}")))?
        .to_string();

    let user_id = Uuid::new_v4();
    let role = req.role;
    let now = format_timestamp(&Utc::now());
    let row = UserRow {
        id: user_id.to_string(),
        phone: req.phone,
        email: req.email,
        display_name: req.display_name,
        role: role.as_str().to_string(),
        volunteer_verified: false,
        password_hash: Some(password_hash),
        created_at: now.clone(),
        updated_at: now,
        version: 0,
    };

    let db = state.clone();
    tokio::task::spawn_blocking(move || db.db.create_user(&row))
        .await
        .map_err(join_error)??;

    let token = create_token(&state.jwt_secret, user_id, role)?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // The identifier may be either contact; try email first.
    let db = state.clone();
    let identifier = req.identifier.clone();
    let user = tokio::task::spawn_blocking(move || -> Result<Option<UserRow>, StoreError> {
        if let Some(user) = db.db.find_user_by_email(&identifier)? {
            return Ok(Some(user));
        }
        db.db.find_user_by_phone(&identifier)
    })
    .await
    .map_err(join_error)??
    .ok_or(ApiError::Unauthorized)?;

    let stored_hash = user.password_hash.as_deref().ok_or(ApiError::Unauthorized)?;
    let parsed_hash = PasswordHash::new(stored_hash)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt password hash: {e}")))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt user id '{}': {e}", user.id)))?;
    let role = UserRole::parse(&user.role).ok_or_else(|| {
        ApiError::Internal(anyhow::anyhow!("corrupt role '{}' on user {}", user.role, user.id))
    })?;

    let token = create_token(&state.jwt_secret, user_id, role)?;

    Ok(Json(LoginResponse {
        user_id,
        display_name: user.display_name,
        role,
        token,
    }))
}

fn create_token(secret: &str, user_id: Uuid, role: UserRole) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        role,
        exp: (Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(anyhow::anyhow!("token encoding failed: {e}")))
}
