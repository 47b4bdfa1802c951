//! Per-chat conversation state machine.
//!
//! Each chat owns one [`Conversation`]. A command starts a flow (and drops
//! whatever flow was in progress); plain text advances the current step.
//! Flows end on success, on `/cancel`, or on the first API error. The bearer
//! token outlives flows.

use tracing::{debug, error};

use habit_types::ReminderTime;
use habit_types::api::{CreateHabitRequest, RegisterRequest, UpdateHabitRequest};
use habit_types::models::Habit;

use crate::api::{ClientError, HabitApi};

pub const HELP: &str = "Hi! I help you keep track of your habits.\n\
\n\
/register - create an account\n\
/login - log in to an existing account\n\
/add - add a habit with a daily reminder\n\
/list - show your habits\n\
/done - mark a habit as done today\n\
/edit - rename, reschedule or pause a habit\n\
/delete - delete a habit\n\
/cancel - abort the current action";

const TIME_PROMPT: &str = "Enter the reminder time as HH:MM (e.g. 09:00):";
const INVALID_TIME: &str = "❌ Invalid time format. Use HH:MM (e.g. 09:00):";
const PICK_AGAIN: &str = "Reply with a number from the list.";
const YES_OR_NO: &str = "Reply yes or no.";
const SORRY: &str = "⚠️ Something went wrong. Please try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Account {
    Login,
    Register,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Edit,
    Delete,
    Done,
}

impl Purpose {
    fn verb(self) -> &'static str {
        match self {
            Self::Edit => "edit",
            Self::Delete => "delete",
            Self::Done => "mark as done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Name,
    Time,
    Active,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Step {
    #[default]
    Idle,
    // -- collecting the first value --
    HabitName,
    Username(Account),
    PickHabit { purpose: Purpose, habits: Vec<Habit> },
    // -- collecting details --
    ReminderTime { name: String },
    Password { account: Account, username: String },
    EditField { habit: Habit },
    EditValue { habit: Habit, field: Field },
    // -- confirm --
    ConfirmDelete { habit: Habit },
}

type Reply = Result<String, ClientError>;

pub struct Conversation {
    telegram_id: i64,
    token: Option<String>,
    step: Step,
}

impl Conversation {
    pub fn new(telegram_id: i64) -> Self {
        Self {
            telegram_id,
            token: None,
            step: Step::Idle,
        }
    }

    /// Feed one incoming message through the state machine and return the
    /// text to answer with.
    pub async fn handle<A: HabitApi>(&mut self, api: &A, text: &str) -> String {
        let step = std::mem::take(&mut self.step);
        let result = match command(text.trim()) {
            Some(cmd) => {
                debug!(telegram_id = self.telegram_id, cmd, "Bot command");
                self.command(api, cmd, step).await
            }
            None => self.advance(api, step, text).await,
        };
        result.unwrap_or_else(|e| self.fail(e))
    }

    async fn command<A: HabitApi>(&mut self, api: &A, cmd: &str, previous: Step) -> Reply {
        match cmd {
            "start" | "help" => Ok(HELP.into()),
            "list" => self.list(api).await,
            "add" => {
                self.token()?;
                self.step = Step::HabitName;
                Ok("Enter the habit name:".into())
            }
            "edit" => self.pick(api, Purpose::Edit).await,
            "delete" => self.pick(api, Purpose::Delete).await,
            "done" => self.pick(api, Purpose::Done).await,
            "login" => {
                self.step = Step::Username(Account::Login);
                Ok("Enter your username:".into())
            }
            "register" => {
                self.step = Step::Username(Account::Register);
                Ok("Choose a username (3-32 characters):".into())
            }
            "cancel" => Ok(match previous {
                Step::Idle => "Nothing to cancel.".into(),
                _ => "Action cancelled.".into(),
            }),
            _ => Ok("Unknown command. Send /help to see what I can do.".into()),
        }
    }

    async fn advance<A: HabitApi>(&mut self, api: &A, step: Step, raw: &str) -> Reply {
        let text = raw.trim();
        match step {
            Step::Idle => Ok("Send /help to see what I can do.".into()),

            Step::HabitName => {
                if text.is_empty() {
                    self.step = Step::HabitName;
                    return Ok("The name can't be empty. Enter the habit name:".into());
                }
                self.step = Step::ReminderTime {
                    name: text.to_string(),
                };
                Ok(TIME_PROMPT.into())
            }

            Step::ReminderTime { name } => {
                let Ok(at) = text.parse::<ReminderTime>() else {
                    self.step = Step::ReminderTime { name };
                    return Ok(INVALID_TIME.into());
                };
                let token = self.token()?;
                let req = CreateHabitRequest {
                    name,
                    reminder_time: at.to_string(),
                };
                let habit = api.create_habit(&token, &req).await?;
                Ok(format!(
                    "✅ Habit '{}' added with a reminder at {}!",
                    habit.name, habit.reminder_time
                ))
            }

            Step::PickHabit { purpose, habits } => {
                let Some(habit) = choose(&habits, text) else {
                    self.step = Step::PickHabit { purpose, habits };
                    return Ok(PICK_AGAIN.into());
                };
                match purpose {
                    Purpose::Edit => {
                        self.step = Step::EditField { habit };
                        Ok("What do you want to change? Reply name, time or active.".into())
                    }
                    Purpose::Delete => {
                        let reply = format!("Delete '{}'? {}", habit.name, YES_OR_NO);
                        self.step = Step::ConfirmDelete { habit };
                        Ok(reply)
                    }
                    Purpose::Done => {
                        let done = api.complete_habit(habit.id, self.telegram_id).await?;
                        Ok(format!(
                            "✅ '{}' marked as done! Streak: {} day(s), completed {} time(s).",
                            habit.name, done.streak, done.completion_count
                        ))
                    }
                }
            }

            Step::EditField { habit } => {
                let field = match text.to_lowercase().as_str() {
                    "name" => Field::Name,
                    "time" => Field::Time,
                    "active" => Field::Active,
                    _ => {
                        self.step = Step::EditField { habit };
                        return Ok("Reply name, time or active.".into());
                    }
                };
                let prompt = match field {
                    Field::Name => "Enter the new name:",
                    Field::Time => TIME_PROMPT,
                    Field::Active => "Keep the habit active? Reply yes or no.",
                };
                self.step = Step::EditValue { habit, field };
                Ok(prompt.into())
            }

            Step::EditValue { habit, field } => {
                let mut req = UpdateHabitRequest::default();
                match field {
                    Field::Name => req.name = Some(text.to_string()),
                    Field::Time => {
                        if text.parse::<ReminderTime>().is_err() {
                            self.step = Step::EditValue { habit, field };
                            return Ok(INVALID_TIME.into());
                        }
                        req.reminder_time = Some(text.to_string());
                    }
                    Field::Active => match yes_no(text) {
                        Some(active) => req.is_active = Some(active),
                        None => {
                            self.step = Step::EditValue { habit, field };
                            return Ok(YES_OR_NO.into());
                        }
                    },
                }
                let token = self.token()?;
                let updated = api.update_habit(&token, habit.id, &req).await?;
                Ok(format!("✅ Habit '{}' updated!", updated.name))
            }

            Step::ConfirmDelete { habit } => match yes_no(text) {
                Some(true) => {
                    let token = self.token()?;
                    api.delete_habit(&token, habit.id, self.telegram_id).await?;
                    Ok(format!("✅ Habit '{}' deleted.", habit.name))
                }
                Some(false) => Ok("Deletion cancelled.".into()),
                None => {
                    self.step = Step::ConfirmDelete { habit };
                    Ok(YES_OR_NO.into())
                }
            },

            Step::Username(account) => {
                if text.is_empty() {
                    self.step = Step::Username(account);
                    return Ok("Enter your username:".into());
                }
                self.step = Step::Password {
                    account,
                    username: text.to_string(),
                };
                Ok("Enter your password:".into())
            }

            Step::Password { account, username } => {
                if account == Account::Register {
                    let req = RegisterRequest {
                        username: username.clone(),
                        password: raw.to_string(),
                        telegram_id: Some(self.telegram_id),
                    };
                    api.register(&req).await?;
                }
                // passwords are taken verbatim
                let token = api.login(&username, raw).await?.access_token;
                if account == Account::Login {
                    api.link_telegram(&token, self.telegram_id).await?;
                }
                self.token = Some(token);
                Ok(match account {
                    Account::Register => {
                        format!("✅ Account '{username}' created and linked to this chat.")
                    }
                    Account::Login => format!("✅ Logged in as '{username}'."),
                })
            }
        }
    }

    async fn list<A: HabitApi>(&mut self, api: &A) -> Reply {
        let habits = self.habits(api).await?;
        if habits.is_empty() {
            return Ok("You have no habits yet! Use /add to create one.".into());
        }
        let lines = habits
            .iter()
            .enumerate()
            .map(|(i, h)| {
                format!(
                    "{}. {} ({}) - streak {}, done {} time(s)",
                    i + 1,
                    h.name,
                    h.reminder_time,
                    h.streak,
                    h.completion_count
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(format!("📋 Your habits:\n{lines}"))
    }

    async fn pick<A: HabitApi>(&mut self, api: &A, purpose: Purpose) -> Reply {
        if purpose != Purpose::Done {
            self.token()?;
        }
        let habits = self.habits(api).await?;
        if habits.is_empty() {
            return Ok(format!("You have no habits to {}!", purpose.verb()));
        }
        let menu = numbered(&habits);
        self.step = Step::PickHabit { purpose, habits };
        Ok(format!("Pick a habit to {} (reply with its number):\n{menu}", purpose.verb()))
    }

    /// Active habits of this chat's identity; an identity without an account
    /// simply has none.
    async fn habits<A: HabitApi>(&self, api: &A) -> Result<Vec<Habit>, ClientError> {
        match api.list_habits(self.telegram_id).await {
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            other => other,
        }
    }

    fn token(&self) -> Result<String, ClientError> {
        self.token.clone().ok_or(ClientError::Unauthorized)
    }

    /// Render a failed step and reset to idle.
    fn fail(&mut self, err: ClientError) -> String {
        self.step = Step::Idle;
        match err {
            ClientError::Status { detail, .. } => format!("❌ {detail}"),
            ClientError::Unauthorized => {
                if self.token.take().is_some() {
                    "🔒 Your session has expired. Please /login again.".into()
                } else {
                    "🔒 Please /login or /register first.".into()
                }
            }
            ClientError::Transport(e) => {
                error!(telegram_id = self.telegram_id, "Habit API unreachable: {}", e);
                SORRY.into()
            }
        }
    }
}

/// Command name of `/cmd` or `/cmd@botname`, without the slash.
fn command(text: &str) -> Option<&str> {
    let word = text.strip_prefix('/')?.split_whitespace().next()?;
    Some(word.split('@').next().unwrap_or(word))
}

fn numbered(habits: &[Habit]) -> String {
    habits
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{}. {} ({})", i + 1, h.name, h.reminder_time))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A habit from the menu: the exact name, else the only name matching
/// without case, else the 1-based position.
fn choose(habits: &[Habit], text: &str) -> Option<Habit> {
    if let Some(habit) = habits.iter().find(|h| h.name == text) {
        return Some(habit.clone());
    }
    let mut folded = habits.iter().filter(|h| h.name.eq_ignore_ascii_case(text));
    if let (Some(habit), None) = (folded.next(), folded.next()) {
        return Some(habit.clone());
    }
    let n = text.parse::<usize>().ok()?;
    n.checked_sub(1).and_then(|i| habits.get(i)).cloned()
}

fn yes_no(text: &str) -> Option<bool> {
    match text.to_lowercase().as_str() {
        "yes" | "y" => Some(true),
        "no" | "n" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
impl Conversation {
    pub fn step(&self) -> &Step {
        &self.step
    }

    pub fn is_logged_in(&self) -> bool {
        self.token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::fake::FakeApi;

    fn habit(name: &str) -> Habit {
        Habit {
            id: Uuid::new_v4(),
            user_id: Uuid::nil(),
            name: name.into(),
            reminder_time: "09:00".parse().unwrap(),
            completion_count: 0,
            streak: 0,
            last_completed: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    async fn say(conv: &mut Conversation, api: &FakeApi, text: &str) -> String {
        conv.handle(api, text).await
    }

    /// A conversation that has registered as `alice` from identity 42.
    async fn registered(api: &FakeApi) -> Conversation {
        let mut conv = Conversation::new(42);
        say(&mut conv, api, "/register").await;
        say(&mut conv, api, "alice").await;
        let reply = say(&mut conv, api, "correct horse").await;
        assert!(reply.contains("created"), "{reply}");
        conv
    }

    async fn add(conv: &mut Conversation, api: &FakeApi, name: &str, at: &str) -> String {
        say(conv, api, "/add").await;
        say(conv, api, name).await;
        say(conv, api, at).await
    }

    #[test]
    fn commands_are_parsed() {
        assert_eq!(command("/add"), Some("add"));
        assert_eq!(command("/done@habit_bot now"), Some("done"));
        assert_eq!(command("add"), None);
        assert_eq!(command("/"), None);
    }

    #[test]
    fn names_win_over_positions() {
        let menu = vec![habit("Walk"), habit("2024"), habit("Read"), habit("read")];
        let name = |text: &str| choose(&menu, text).map(|h| h.name);

        assert_eq!(name("2024").as_deref(), Some("2024"));
        assert_eq!(name("1").as_deref(), Some("Walk"));
        assert_eq!(name("read").as_deref(), Some("read"));
        assert_eq!(name("Read").as_deref(), Some("Read"));
        assert_eq!(name("WALK").as_deref(), Some("Walk"));
        // two names match without case and neither exactly
        assert_eq!(name("READ"), None);
        assert_eq!(name("9"), None);
    }

    #[tokio::test]
    async fn help_and_unknown_input() {
        let api = FakeApi::default();
        let mut conv = Conversation::new(42);
        assert_eq!(say(&mut conv, &api, "/start").await, HELP);
        assert!(say(&mut conv, &api, "hello").await.contains("/help"));
        assert!(say(&mut conv, &api, "/dance").await.starts_with("Unknown command"));
        assert_eq!(say(&mut conv, &api, "/cancel").await, "Nothing to cancel.");
    }

    #[tokio::test]
    async fn adding_requires_an_account() {
        let api = FakeApi::default();
        let mut conv = Conversation::new(42);
        let reply = say(&mut conv, &api, "/add").await;
        assert!(reply.contains("/login or /register"), "{reply}");
        assert_eq!(conv.step(), &Step::Idle);
    }

    #[tokio::test]
    async fn add_flow_reprompts_on_a_bad_time() {
        let api = FakeApi::default();
        let mut conv = registered(&api).await;
        assert!(conv.is_logged_in());

        say(&mut conv, &api, "/add").await;
        assert_eq!(say(&mut conv, &api, "Read").await, TIME_PROMPT);
        assert_eq!(say(&mut conv, &api, "25:61").await, INVALID_TIME);
        assert!(matches!(conv.step(), Step::ReminderTime { name } if name == "Read"));

        let reply = say(&mut conv, &api, "9:00").await;
        assert_eq!(reply, "✅ Habit 'Read' added with a reminder at 09:00!");
        assert_eq!(conv.step(), &Step::Idle);
        assert_eq!(api.habit_names(), vec!["Read".to_string()]);
    }

    #[tokio::test]
    async fn api_errors_are_shown_and_end_the_flow() {
        let api = FakeApi::default();
        let mut conv = registered(&api).await;
        add(&mut conv, &api, "Read", "09:00").await;

        let reply = add(&mut conv, &api, "Read", "10:00").await;
        assert_eq!(reply, "❌ Habit 'Read' already exists");
        assert_eq!(conv.step(), &Step::Idle);
        assert!(conv.is_logged_in());
    }

    #[tokio::test]
    async fn list_and_done() {
        let api = FakeApi::default();
        let mut conv = registered(&api).await;
        assert!(say(&mut conv, &api, "/list").await.contains("no habits yet"));

        add(&mut conv, &api, "Read", "09:00").await;
        add(&mut conv, &api, "Walk", "18:30").await;
        let list = say(&mut conv, &api, "/list").await;
        assert!(list.contains("1. Read (09:00)"), "{list}");
        assert!(list.contains("2. Walk (18:30)"), "{list}");

        say(&mut conv, &api, "/done").await;
        assert_eq!(say(&mut conv, &api, "7").await, PICK_AGAIN);
        let reply = say(&mut conv, &api, "walk").await;
        assert!(reply.starts_with("✅ 'Walk' marked as done!"), "{reply}");
        assert!(reply.contains("completed 1 time(s)"), "{reply}");
    }

    #[tokio::test]
    async fn done_works_without_a_token() {
        let api = FakeApi::default();
        let mut owner = registered(&api).await;
        add(&mut owner, &api, "Read", "09:00").await;

        // same identity, fresh conversation (e.g. after a bot restart)
        let mut conv = Conversation::new(42);
        say(&mut conv, &api, "/done").await;
        let reply = say(&mut conv, &api, "1").await;
        assert!(reply.contains("marked as done"), "{reply}");
    }

    #[tokio::test]
    async fn edit_flow() {
        let api = FakeApi::default();
        let mut conv = registered(&api).await;
        add(&mut conv, &api, "Read", "09:00").await;

        say(&mut conv, &api, "/edit").await;
        say(&mut conv, &api, "1").await;
        assert_eq!(say(&mut conv, &api, "colour").await, "Reply name, time or active.");
        assert_eq!(say(&mut conv, &api, "time").await, TIME_PROMPT);
        assert_eq!(say(&mut conv, &api, "7pm").await, INVALID_TIME);
        assert_eq!(say(&mut conv, &api, "21:30").await, "✅ Habit 'Read' updated!");
        assert_eq!(api.habit("Read").unwrap().reminder_time.to_string(), "21:30");

        say(&mut conv, &api, "/edit").await;
        say(&mut conv, &api, "1").await;
        say(&mut conv, &api, "active").await;
        say(&mut conv, &api, "no").await;
        assert!(!api.habit("Read").unwrap().is_active);
        assert!(say(&mut conv, &api, "/list").await.contains("no habits yet"));
    }

    #[tokio::test]
    async fn delete_needs_confirmation() {
        let api = FakeApi::default();
        let mut conv = registered(&api).await;
        add(&mut conv, &api, "Read", "09:00").await;

        say(&mut conv, &api, "/delete").await;
        assert_eq!(say(&mut conv, &api, "1").await, "Delete 'Read'? Reply yes or no.");
        assert_eq!(say(&mut conv, &api, "maybe").await, YES_OR_NO);
        assert_eq!(say(&mut conv, &api, "no").await, "Deletion cancelled.");
        assert!(api.habit("Read").is_some());

        say(&mut conv, &api, "/delete").await;
        say(&mut conv, &api, "1").await;
        assert_eq!(say(&mut conv, &api, "yes").await, "✅ Habit 'Read' deleted.");
        assert!(api.habit("Read").is_none());
    }

    #[tokio::test]
    async fn cancel_and_reentry_keep_the_token() {
        let api = FakeApi::default();
        let mut conv = registered(&api).await;

        say(&mut conv, &api, "/add").await;
        say(&mut conv, &api, "Read").await;
        assert_eq!(say(&mut conv, &api, "/cancel").await, "Action cancelled.");
        assert_eq!(conv.step(), &Step::Idle);
        assert!(conv.is_logged_in());

        say(&mut conv, &api, "/add").await;
        assert!(say(&mut conv, &api, "/list").await.contains("no habits yet"));
        assert_eq!(conv.step(), &Step::Idle);
        assert!(api.habit_names().is_empty());
    }

    #[tokio::test]
    async fn expired_session_asks_to_log_in_again() {
        let api = FakeApi::default();
        let mut conv = registered(&api).await;
        api.revoke_tokens();

        let reply = add(&mut conv, &api, "Read", "09:00").await;
        assert!(reply.contains("session has expired"), "{reply}");
        assert!(!conv.is_logged_in());
    }

    #[tokio::test]
    async fn passwords_keep_surrounding_spaces() {
        let api = FakeApi::default();
        let mut conv = Conversation::new(42);
        say(&mut conv, &api, "/register").await;
        say(&mut conv, &api, "  alice ").await;
        let reply = say(&mut conv, &api, " padded secret ").await;
        assert_eq!(reply, "✅ Account 'alice' created and linked to this chat.");

        let mut other_chat = Conversation::new(77);
        say(&mut other_chat, &api, "/login").await;
        say(&mut other_chat, &api, "alice").await;
        assert_eq!(
            say(&mut other_chat, &api, "padded secret").await,
            "❌ Incorrect username or password"
        );

        say(&mut other_chat, &api, "/login").await;
        say(&mut other_chat, &api, "alice").await;
        assert_eq!(say(&mut other_chat, &api, " padded secret ").await, "✅ Logged in as 'alice'.");
    }

    #[tokio::test]
    async fn login_links_the_chat() {
        let api = FakeApi::default();
        registered(&api).await;

        let mut other_chat = Conversation::new(77);
        say(&mut other_chat, &api, "/login").await;
        say(&mut other_chat, &api, "alice").await;
        assert_eq!(
            say(&mut other_chat, &api, "wrong").await,
            "❌ Incorrect username or password"
        );
        assert!(!other_chat.is_logged_in());

        say(&mut other_chat, &api, "/login").await;
        say(&mut other_chat, &api, "alice").await;
        assert_eq!(say(&mut other_chat, &api, "correct horse").await, "✅ Logged in as 'alice'.");
        assert_eq!(api.telegram_of("alice"), Some(77));
    }
}
