use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Form, Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::WithRejection;
use chrono::{Duration, FixedOffset};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{info, warn};
use uuid::Uuid;

use habit_db::Database;
use habit_db::models::UserRow;
use habit_scheduler::ReminderScheduler;
use habit_types::api::{Claims, RegisterRequest, TokenRequest, TokenResponse};

use crate::blocking;
use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub token_ttl: Duration,
    /// Offset in which habit calendar days are counted.
    pub tz: FixedOffset,
    pub scheduler: Arc<dyn ReminderScheduler>,
    pub hasher: Argon2<'static>,
}

impl AppStateInner {
    pub fn new(
        db: Database,
        jwt_secret: String,
        tz: FixedOffset,
        scheduler: Arc<dyn ReminderScheduler>,
    ) -> Self {
        Self {
            db,
            jwt_secret,
            token_ttl: Duration::minutes(30),
            tz,
            scheduler,
            hasher: Argon2::default(),
        }
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn with_hasher(mut self, hasher: Argon2<'static>) -> Self {
        self.hasher = hasher;
        self
    }
}

/// POST /users — create an account, optionally already linked to a
/// Telegram identity.
pub async fn register(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<RegisterRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    let len = username.chars().count();
    if !(3..=32).contains(&len) {
        return Err(ApiError::Validation(
            "Username must be between 3 and 32 characters".into(),
        ));
    }
    if req.password.chars().count() < 8 {
        return Err(ApiError::Validation(
            "Password must be at least 8 characters".into(),
        ));
    }

    let (name_taken, telegram_taken) = {
        let username = username.clone();
        let telegram_id = req.telegram_id;
        blocking(&state, move |db| {
            let name_taken = db.get_user_by_username(&username)?.is_some();
            let telegram_taken = match telegram_id {
                Some(id) => db.get_user_by_telegram_id(id)?.is_some(),
                None => false,
            };
            Ok((name_taken, telegram_taken))
        })
        .await?
    };
    if name_taken {
        return Err(ApiError::Conflict("Username already registered".into()));
    }
    if telegram_taken {
        return Err(ApiError::Conflict(
            "Telegram account is already linked to another user".into(),
        ));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = state
        .hasher
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| {
            warn!("Password hashing failed: {}", e);
            ApiError::Internal
        })?
        .to_string();

    let user_id = Uuid::new_v4();
    let telegram_id = req.telegram_id;
    let user = blocking(&state, move |db| {
        db.create_user(user_id, &username, &password_hash, telegram_id)
    })
    .await?;

    info!(user_id = %user.id, username = %user.username, "User registered");
    Ok((StatusCode::CREATED, Json(user.into_user())))
}

/// POST /token — OAuth2 password grant issuing a short-lived bearer token.
pub async fn issue_token(
    State(state): State<AppState>,
    WithRejection(Form(req), _): WithRejection<Form<TokenRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let bad_credentials = || ApiError::Unauthorized("Incorrect username or password".into());

    let username = req.username.trim().to_string();
    let user = blocking(&state, move |db| db.get_user_by_username(&username))
        .await?
        .ok_or_else(bad_credentials)?;

    let parsed_hash = PasswordHash::new(&user.password).map_err(|e| {
        warn!(user_id = %user.id, "Stored password hash unreadable: {}", e);
        ApiError::Internal
    })?;
    state
        .hasher
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| bad_credentials())?;

    if !user.is_active {
        return Err(ApiError::Unauthorized("Account is disabled".into()));
    }

    let access_token = create_token(&state.jwt_secret, &user, state.token_ttl).map_err(|e| {
        warn!("Token encoding failed: {}", e);
        ApiError::Internal
    })?;

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".into(),
        expires_in: state.token_ttl.num_seconds(),
    }))
}

pub fn create_token(secret: &str, user: &UserRow, ttl: Duration) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user.username.clone(),
        uid: user.id,
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

pub fn decode_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::Unauthorized("Invalid or expired token".into()))
}

/// Resolve the account behind a token. Tokens of deleted or disabled
/// accounts are rejected.
pub(crate) async fn current_user(state: &AppState, claims: &Claims) -> Result<UserRow, ApiError> {
    let uid = claims.uid;
    let user = blocking(state, move |db| db.get_user_by_id(uid)).await?;
    match user {
        Some(user) if user.is_active => Ok(user),
        _ => Err(ApiError::Unauthorized("Account no longer exists".into())),
    }
}
