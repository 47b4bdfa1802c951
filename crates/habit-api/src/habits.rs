use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use habit_db::models::{HabitRow, NewHabit, UserRow};
use habit_scheduler::{ReminderJob, SchedulerError};
use habit_types::ReminderTime;
use habit_types::api::{
    Claims, CompleteHabitRequest, CompleteHabitResponse, CreateHabitRequest, StatusResponse,
    UpdateHabitRequest,
};

use crate::auth::{AppState, current_user};
use crate::blocking;
use crate::error::ApiError;

const MAX_NAME_LEN: usize = 100;
const MAX_PAGE: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct HabitListQuery {
    pub telegram_id: i64,
    #[serde(default)]
    pub skip: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    MAX_PAGE
}

#[derive(Debug, Deserialize)]
pub struct IdentityQuery {
    pub telegram_id: i64,
}

/// POST /habits — create a habit for the token's account and book its
/// reminder. Nothing is stored when the reminder cannot be booked.
pub async fn create_habit(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<CreateHabitRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let name = validate_name(&req.name)?;
    let reminder_time = parse_time(&req.reminder_time)?;
    let user = current_user(&state, &claims).await?;

    let (user_id, lookup) = (user.id, name.clone());
    let existing = blocking(&state, move |db| db.find_active_habit(user_id, &lookup)).await?;
    if existing.is_some() {
        return Err(duplicate_name(&name));
    }

    let job_id = book_reminder(&state, &user, &name, reminder_time)?;

    let new_habit = NewHabit {
        id: Uuid::new_v4(),
        user_id: user.id,
        name: name.clone(),
        reminder_time,
        job_id: job_id.clone(),
    };
    let inserted = blocking(&state, move |db| db.insert_habit(&new_habit)).await;
    let habit = match inserted {
        Ok(habit) => habit,
        Err(e) => {
            if let Some(id) = &job_id {
                state.scheduler.cancel(id);
            }
            return Err(match e {
                ApiError::Conflict(_) => duplicate_name(&name),
                other => other,
            });
        }
    };

    info!(habit_id = %habit.id, user_id = %user.id, name = %habit.name, "Habit created");
    Ok((StatusCode::CREATED, Json(habit.into_habit())))
}

/// GET /habits?telegram_id= — active habits of the account linked to that
/// Telegram identity.
pub async fn list_habits(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<HabitListQuery>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let telegram_id = query.telegram_id;
    let limit = query.limit.min(MAX_PAGE);
    let skip = query.skip;

    let habits = blocking(&state, move |db| {
        let Some(user) = db.get_user_by_telegram_id(telegram_id)? else {
            return Ok(None);
        };
        Ok(Some(db.list_active_habits(user.id, skip, limit)?))
    })
    .await?
    .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    Ok(Json(
        habits.into_iter().map(HabitRow::into_habit).collect::<Vec<_>>(),
    ))
}

/// PUT /habits/{habit_id} — rename, move the reminder, or (de)activate.
/// Any change to the reminder cancels the old job and books a new one.
pub async fn update_habit(
    State(state): State<AppState>,
    WithRejection(Path(habit_id), _): WithRejection<Path<Uuid>, ApiError>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<UpdateHabitRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let new_name = req.name.as_deref().map(validate_name).transpose()?;
    let new_time = req.reminder_time.as_deref().map(parse_time).transpose()?;

    let user = current_user(&state, &claims).await?;
    let habit = load_habit(&state, habit_id).await?;
    if habit.user_id != user.id {
        return Err(not_your_habit());
    }

    let mut updated = habit.clone();
    if let Some(name) = new_name {
        updated.name = name;
    }
    if let Some(time) = new_time {
        updated.reminder_time = time;
    }
    if let Some(active) = req.is_active {
        updated.is_active = active;
    }

    let renamed = updated.name != habit.name;
    let reactivated = updated.is_active && !habit.is_active;
    if updated.is_active && (renamed || reactivated) {
        let (user_id, lookup) = (user.id, updated.name.clone());
        let clash = blocking(&state, move |db| db.find_active_habit(user_id, &lookup)).await?;
        if clash.is_some_and(|other| other.id != habit.id) {
            return Err(duplicate_name(&updated.name));
        }
    }

    let reschedule = renamed
        || updated.reminder_time != habit.reminder_time
        || updated.is_active != habit.is_active;
    if reschedule {
        if let Some(old) = &habit.job_id {
            state.scheduler.cancel(old);
        }
        updated.job_id = None;
        if updated.is_active {
            match book_reminder(&state, &user, &updated.name, updated.reminder_time) {
                Ok(job_id) => updated.job_id = job_id,
                Err(e) => {
                    restore_reminder(&state, &user, &habit);
                    return Err(e);
                }
            }
        }
    }

    let row = updated.clone();
    let saved = match blocking(&state, move |db| db.save_habit_settings(&row)).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(ApiError::NotFound("Habit not found".into())),
        Err(ApiError::Conflict(_)) => Err(duplicate_name(&updated.name)),
        Err(e) => Err(e),
    };
    if let Err(e) = saved {
        if reschedule {
            if let Some(id) = &updated.job_id {
                state.scheduler.cancel(id);
            }
            restore_reminder(&state, &user, &habit);
        }
        return Err(e);
    }

    info!(habit_id = %habit.id, active = updated.is_active, "Habit updated");
    Ok(Json(updated.into_habit()))
}

/// DELETE /habits/{habit_id}?telegram_id= — the token's account and the
/// Telegram identity must both own the habit.
pub async fn delete_habit(
    State(state): State<AppState>,
    WithRejection(Path(habit_id), _): WithRejection<Path<Uuid>, ApiError>,
    WithRejection(Query(identity), _): WithRejection<Query<IdentityQuery>, ApiError>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let habit = load_habit(&state, habit_id).await?;
    check_identity(&state, &habit, identity.telegram_id).await?;
    if habit.user_id != claims.uid {
        return Err(not_your_habit());
    }

    let deleted = blocking(&state, move |db| db.delete_habit(habit_id)).await?;
    if !deleted {
        return Err(ApiError::NotFound("Habit not found".into()));
    }
    if let Some(job_id) = &habit.job_id {
        state.scheduler.cancel(job_id);
    }

    info!(habit_id = %habit_id, "Habit deleted");
    Ok(Json(StatusResponse::success()))
}

/// POST /habits/{habit_id}/complete — record a completion for the owner
/// identified by Telegram id.
pub async fn complete_habit(
    State(state): State<AppState>,
    WithRejection(Path(habit_id), _): WithRejection<Path<Uuid>, ApiError>,
    WithRejection(Json(req), _): WithRejection<Json<CompleteHabitRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let habit = load_habit(&state, habit_id).await?;
    check_identity(&state, &habit, req.telegram_id).await?;

    let (now, tz) = (chrono::Utc::now(), state.tz);
    let completed = blocking(&state, move |db| db.complete_habit(habit_id, now, tz))
        .await?
        .ok_or_else(|| ApiError::NotFound("Habit not found".into()))?;

    info!(
        habit_id = %habit_id,
        completion_count = completed.completion_count,
        streak = completed.streak,
        "Habit completed"
    );
    Ok(Json(CompleteHabitResponse {
        status: "success".into(),
        completion_count: completed.completion_count,
        streak: completed.streak,
    }))
}

// -- Helpers --

fn validate_name(raw: &str) -> Result<String, ApiError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("Habit name must not be empty".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::Validation(format!(
            "Habit name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn parse_time(raw: &str) -> Result<ReminderTime, ApiError> {
    raw.parse::<ReminderTime>()
        .map_err(|e| ApiError::Validation(e.to_string()))
}

fn duplicate_name(name: &str) -> ApiError {
    ApiError::Conflict(format!("Habit '{name}' already exists"))
}

fn not_your_habit() -> ApiError {
    ApiError::Forbidden("Not your habit".into())
}

async fn load_habit(state: &AppState, habit_id: Uuid) -> Result<HabitRow, ApiError> {
    blocking(state, move |db| db.get_habit(habit_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("Habit not found".into()))
}

/// The habit's owner must be the account linked to `telegram_id`.
async fn check_identity(state: &AppState, habit: &HabitRow, telegram_id: i64) -> Result<(), ApiError> {
    let owner = blocking(state, move |db| db.get_user_by_telegram_id(telegram_id)).await?;
    match owner {
        Some(user) if user.id == habit.user_id => Ok(()),
        _ => Err(not_your_habit()),
    }
}

/// Book the reminder for a habit. Accounts without a Telegram identity get
/// no job; the job is booked once they link one.
fn book_reminder(
    state: &AppState,
    user: &UserRow,
    name: &str,
    at: ReminderTime,
) -> Result<Option<String>, ApiError> {
    let Some(chat_id) = user.telegram_id else {
        return Ok(None);
    };
    let job = ReminderJob::new(user.id, chat_id, name, at);
    let job_id = job.id.clone();
    match state.scheduler.register(job) {
        Ok(()) => Ok(Some(job_id)),
        Err(SchedulerError::Duplicate(_)) => Err(duplicate_name(name)),
        Err(e) => {
            error!(user_id = %user.id, "Reminder registration failed: {}", e);
            Err(ApiError::Internal)
        }
    }
}

/// Put back the job a failed update cancelled.
fn restore_reminder(state: &AppState, user: &UserRow, habit: &HabitRow) {
    if habit.job_id.is_none() || !habit.is_active {
        return;
    }
    if let Err(e) = book_reminder(state, user, &habit.name, habit.reminder_time) {
        warn!(habit_id = %habit.id, "Could not restore reminder: {}", e);
    }
}
