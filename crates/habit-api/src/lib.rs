pub mod auth;
pub mod error;
pub mod habits;
pub mod middleware;
pub mod users;

use axum::{
    Router,
    routing::{get, post, put},
};

use habit_db::Database;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;

/// All REST routes. Bearer-protected routes carry the auth layer on their
/// own method router so public and protected methods can share a path.
pub fn router(state: AppState) -> Router {
    let bearer = axum::middleware::from_fn_with_state(state.clone(), middleware::require_auth);

    Router::new()
        .route("/health", get(health))
        .route("/users", post(auth::register))
        .route("/token", post(auth::issue_token))
        .route("/users/me", get(users::me).route_layer(bearer.clone()))
        .route(
            "/users/me/telegram",
            put(users::link_telegram).route_layer(bearer.clone()),
        )
        .route(
            "/habits",
            get(habits::list_habits).merge(post(habits::create_habit).route_layer(bearer.clone())),
        )
        .route(
            "/habits/{habit_id}",
            put(habits::update_habit)
                .delete(habits::delete_habit)
                .route_layer(bearer),
        )
        .route("/habits/{habit_id}/complete", post(habits::complete_habit))
        .with_state(state)
}

pub async fn health() -> &'static str {
    "ok"
}

/// Run blocking database work off the async runtime.
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            tracing::error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })?
        .map_err(ApiError::from)
}
