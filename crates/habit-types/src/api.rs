use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// Bearer token claims. `sub` is the username; `uid` saves a lookup when
/// only the id is needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub uid: Uuid,
    pub exp: usize,
}

// -- Users --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub telegram_id: Option<i64>,
}

/// OAuth2 password-grant form. Extra form fields such as `grant_type` or
/// `scope` are ignored.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    /// Seconds until the token expires.
    pub expires_in: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkTelegramRequest {
    pub telegram_id: i64,
}

// -- Habits --

/// `reminder_time` stays a plain string here so a malformed value is
/// reported as a validation error rather than a body rejection.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateHabitRequest {
    pub name: String,
    pub reminder_time: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateHabitRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompleteHabitRequest {
    pub telegram_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompleteHabitResponse {
    pub status: String,
    pub completion_count: u32,
    pub streak: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn success() -> Self {
        Self { status: "success".into() }
    }
}

/// Body of every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}
