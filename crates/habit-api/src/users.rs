use axum::{Extension, Json, extract::State, response::IntoResponse};
use axum_extra::extract::WithRejection;
use tracing::{info, warn};

use habit_scheduler::ReminderJob;
use habit_types::api::{Claims, LinkTelegramRequest};

use crate::auth::{AppState, current_user};
use crate::blocking;
use crate::error::ApiError;

/// GET /users/me
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = current_user(&state, &claims).await?;
    Ok(Json(user.into_user()))
}

/// PUT /users/me/telegram — link the caller's account to a Telegram
/// identity. Reminders of the account's active habits are (re)booked for
/// the new chat.
pub async fn link_telegram(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<LinkTelegramRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let user = current_user(&state, &claims).await?;
    let telegram_id = req.telegram_id;

    let holder = blocking(&state, move |db| db.get_user_by_telegram_id(telegram_id)).await?;
    if holder.is_some_and(|other| other.id != user.id) {
        return Err(ApiError::Conflict(
            "Telegram account is already linked to another user".into(),
        ));
    }

    let user_id = user.id;
    let (linked, habits) = blocking(&state, move |db| {
        let linked = db.link_telegram(user_id, telegram_id)?;
        let habits = db.list_active_habits(user_id, 0, u32::MAX)?;
        Ok((linked, habits))
    })
    .await?;
    let linked = linked.ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    for habit in habits {
        if let Some(old) = &habit.job_id {
            state.scheduler.cancel(old);
        }
        let job = ReminderJob::new(user_id, telegram_id, &habit.name, habit.reminder_time);
        let job_id = job.id.clone();
        let booked = match state.scheduler.register(job) {
            Ok(()) => Some(job_id),
            Err(e) => {
                warn!(habit_id = %habit.id, "Could not book reminder after linking: {}", e);
                None
            }
        };
        let habit_id = habit.id;
        blocking(&state, move |db| db.set_job_id(habit_id, booked.as_deref())).await?;
    }

    info!(user_id = %linked.id, telegram_id, "Telegram identity linked");
    Ok(Json(linked.into_user()))
}
