use axum::{
    Json,
    extract::rejection::{FormRejection, JsonRejection, PathRejection, QueryRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use habit_types::api::ErrorBody;

/// Errors surfaced to API clients. The message becomes the `detail` field
/// of the JSON body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Storage failures: UNIQUE violations lost a race with a concurrent write
/// and become conflicts, everything else is logged and hidden.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if habit_db::is_unique_violation(&err) {
            return Self::Conflict("Resource already exists".into());
        }
        error!("Database error: {:#}", err);
        Self::Internal
    }
}

/// Malformed bodies, forms, paths and query strings answer with the same
/// JSON body as every other error.
macro_rules! rejection_is_validation {
    ($($rejection:ty),+) => {
        $(impl From<$rejection> for ApiError {
            fn from(rejection: $rejection) -> Self {
                Self::Validation(rejection.body_text())
            }
        })+
    };
}

rejection_is_validation!(JsonRejection, FormRejection, PathRejection, QueryRejection);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut resp = (status, Json(ErrorBody { detail: self.to_string() })).into_response();
        if status == StatusCode::UNAUTHORIZED {
            resp.headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        resp
    }
}
