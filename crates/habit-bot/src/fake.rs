//! In-memory stand-in for the habit REST API.

use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use habit_types::ReminderTime;
use habit_types::api::{
    CompleteHabitResponse, CreateHabitRequest, RegisterRequest, TokenResponse, UpdateHabitRequest,
};
use habit_types::models::{Habit, User};

use crate::api::{ClientError, HabitApi};

#[derive(Default)]
pub struct FakeApi {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    users: Vec<(User, String)>,
    habits: Vec<Habit>,
    revoked: bool,
}

fn status(status: u16, detail: impl Into<String>) -> ClientError {
    ClientError::Status {
        status,
        detail: detail.into(),
    }
}

impl State {
    fn bearer(&self, token: &str) -> Result<User, ClientError> {
        if self.revoked {
            return Err(ClientError::Unauthorized);
        }
        let username = token.strip_prefix("token-").ok_or(ClientError::Unauthorized)?;
        self.users
            .iter()
            .find(|(u, _)| u.username == username)
            .map(|(u, _)| u.clone())
            .ok_or(ClientError::Unauthorized)
    }

    fn owner_of(&self, telegram_id: i64) -> Option<User> {
        self.users
            .iter()
            .find(|(u, _)| u.telegram_id == Some(telegram_id))
            .map(|(u, _)| u.clone())
    }

    fn habit_mut(&mut self, id: Uuid) -> Result<&mut Habit, ClientError> {
        self.habits
            .iter_mut()
            .find(|h| h.id == id)
            .ok_or_else(|| status(404, "Habit not found"))
    }
}

impl FakeApi {
    pub fn revoke_tokens(&self) {
        self.state.lock().unwrap().revoked = true;
    }

    pub fn habit(&self, name: &str) -> Option<Habit> {
        let state = self.state.lock().unwrap();
        state.habits.iter().find(|h| h.name == name).cloned()
    }

    pub fn habit_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.habits.iter().map(|h| h.name.clone()).collect()
    }

    pub fn telegram_of(&self, username: &str) -> Option<i64> {
        let state = self.state.lock().unwrap();
        state
            .users
            .iter()
            .find(|(u, _)| u.username == username)
            .and_then(|(u, _)| u.telegram_id)
    }
}

impl HabitApi for FakeApi {
    async fn register(&self, req: &RegisterRequest) -> Result<User, ClientError> {
        let mut state = self.state.lock().unwrap();
        if state.users.iter().any(|(u, _)| u.username == req.username) {
            return Err(status(409, "Username already registered"));
        }
        let user = User {
            id: Uuid::new_v4(),
            username: req.username.clone(),
            telegram_id: req.telegram_id,
            created_at: Utc::now(),
            is_active: true,
        };
        state.users.push((user.clone(), req.password.clone()));
        Ok(user)
    }

    async fn login(&self, username: &str, password: &str) -> Result<TokenResponse, ClientError> {
        let state = self.state.lock().unwrap();
        let known = state
            .users
            .iter()
            .any(|(u, p)| u.username == username && p == password);
        if !known {
            return Err(status(401, "Incorrect username or password"));
        }
        Ok(TokenResponse {
            access_token: format!("token-{username}"),
            token_type: "bearer".into(),
            expires_in: 1800,
        })
    }

    async fn link_telegram(&self, token: &str, telegram_id: i64) -> Result<User, ClientError> {
        let mut state = self.state.lock().unwrap();
        let user = state.bearer(token)?;
        for (u, _) in &state.users {
            if u.telegram_id == Some(telegram_id) && u.id != user.id {
                return Err(status(409, "Telegram account is already linked to another user"));
            }
        }
        let (u, _) = state
            .users
            .iter_mut()
            .find(|(u, _)| u.id == user.id)
            .ok_or_else(|| status(404, "User not found"))?;
        u.telegram_id = Some(telegram_id);
        Ok(u.clone())
    }

    async fn list_habits(&self, telegram_id: i64) -> Result<Vec<Habit>, ClientError> {
        let state = self.state.lock().unwrap();
        let owner = state
            .owner_of(telegram_id)
            .ok_or_else(|| status(404, "User not found"))?;
        Ok(state
            .habits
            .iter()
            .filter(|h| h.user_id == owner.id && h.is_active)
            .cloned()
            .collect())
    }

    async fn create_habit(&self, token: &str, req: &CreateHabitRequest) -> Result<Habit, ClientError> {
        let mut state = self.state.lock().unwrap();
        let user = state.bearer(token)?;
        let reminder_time = req
            .reminder_time
            .parse::<ReminderTime>()
            .map_err(|e| status(400, e.to_string()))?;
        if state
            .habits
            .iter()
            .any(|h| h.user_id == user.id && h.is_active && h.name == req.name)
        {
            return Err(status(409, format!("Habit '{}' already exists", req.name)));
        }
        let habit = Habit {
            id: Uuid::new_v4(),
            user_id: user.id,
            name: req.name.clone(),
            reminder_time,
            completion_count: 0,
            streak: 0,
            last_completed: None,
            is_active: true,
            created_at: Utc::now(),
        };
        state.habits.push(habit.clone());
        Ok(habit)
    }

    async fn update_habit(
        &self,
        token: &str,
        habit_id: Uuid,
        req: &UpdateHabitRequest,
    ) -> Result<Habit, ClientError> {
        let mut state = self.state.lock().unwrap();
        let user = state.bearer(token)?;
        let habit = state.habit_mut(habit_id)?;
        if habit.user_id != user.id {
            return Err(status(403, "Not your habit"));
        }
        if let Some(name) = &req.name {
            habit.name = name.clone();
        }
        if let Some(at) = &req.reminder_time {
            habit.reminder_time = at
                .parse::<ReminderTime>()
                .map_err(|e| status(400, e.to_string()))?;
        }
        if let Some(active) = req.is_active {
            habit.is_active = active;
        }
        Ok(habit.clone())
    }

    async fn delete_habit(&self, token: &str, habit_id: Uuid, telegram_id: i64) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        let user = state.bearer(token)?;
        let owner = state.owner_of(telegram_id);
        let habit = state.habit_mut(habit_id)?;
        if habit.user_id != user.id || owner.map(|o| o.id) != Some(user.id) {
            return Err(status(403, "Not your habit"));
        }
        state.habits.retain(|h| h.id != habit_id);
        Ok(())
    }

    async fn complete_habit(
        &self,
        habit_id: Uuid,
        telegram_id: i64,
    ) -> Result<CompleteHabitResponse, ClientError> {
        let mut state = self.state.lock().unwrap();
        let owner = state.owner_of(telegram_id);
        let habit = state.habit_mut(habit_id)?;
        if owner.map(|o| o.id) != Some(habit.user_id) {
            return Err(status(403, "Not your habit"));
        }
        let progress = habit.progress().complete(Utc::now(), chrono::FixedOffset::east_opt(0).unwrap());
        habit.completion_count = progress.completion_count;
        habit.streak = progress.streak;
        habit.last_completed = progress.last_completed;
        Ok(CompleteHabitResponse {
            status: "success".into(),
            completion_count: habit.completion_count,
            streak: habit.streak,
        })
    }
}
