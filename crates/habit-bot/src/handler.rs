use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use habit_telegram::{Message, TelegramClient, Update};

use crate::api::HabitApi;
use crate::dialogue::Conversation;

/// A chat worker with nothing to do for this long exits and forgets the
/// chat's conversations.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Routes incoming messages to one worker per chat. A worker handles its
/// chat's messages one at a time, in the order they were dispatched.
pub struct Bot<A> {
    api: A,
    telegram: TelegramClient,
    chats: Mutex<HashMap<i64, mpsc::UnboundedSender<Message>>>,
    idle: Duration,
}

impl<A: HabitApi> Bot<A> {
    pub fn new(api: A, telegram: TelegramClient) -> Self {
        Self::with_idle_timeout(api, telegram, IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(api: A, telegram: TelegramClient, idle: Duration) -> Self {
        Self {
            api,
            telegram,
            chats: Mutex::new(HashMap::new()),
            idle,
        }
    }

    /// Queue an update on its chat's worker, starting one if needed.
    /// Callers must dispatch updates in the order Telegram returned them.
    pub async fn dispatch(self: &Arc<Self>, update: Update) {
        let Some(message) = update.message else {
            return;
        };
        if message.text.is_none() {
            return;
        }
        let chat_id = message.chat.id;

        let mut chats = self.chats.lock().await;
        let message = match chats.get(&chat_id) {
            Some(inbox) => match inbox.send(message) {
                Ok(()) => return,
                Err(mpsc::error::SendError(message)) => message,
            },
            None => message,
        };
        let (inbox, rx) = mpsc::unbounded_channel();
        // rx is alive until the worker starts
        let _ = inbox.send(message);
        chats.insert(chat_id, inbox);
        debug!(chat_id, "Chat worker started");
        tokio::spawn(self.clone().serve_chat(chat_id, rx));
    }

    async fn serve_chat(self: Arc<Self>, chat_id: i64, mut inbox: mpsc::UnboundedReceiver<Message>) {
        let mut sessions = Sessions::default();
        loop {
            let message = match tokio::time::timeout(self.idle, inbox.recv()).await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(_) => {
                    // dispatch sends under this lock, so nothing is lost on exit
                    let mut chats = self.chats.lock().await;
                    match inbox.try_recv() {
                        Ok(message) => message,
                        Err(_) => {
                            chats.remove(&chat_id);
                            break;
                        }
                    }
                }
            };
            let Some(reply) = sessions.reply(&self.api, &message).await else {
                continue;
            };
            if let Err(e) = self.telegram.send_message(chat_id, &reply).await {
                warn!(chat_id, "Failed to send reply: {}", e);
            }
        }
        debug!(chat_id, "Chat worker idle, conversations dropped");
    }
}

/// Conversations of one chat, one per sender.
#[derive(Default)]
pub struct Sessions {
    conversations: HashMap<i64, Conversation>,
}

impl Sessions {
    /// The answer to a text message. The sender's Telegram id is the
    /// identity; channel posts without a sender fall back to the chat id.
    pub async fn reply<A: HabitApi>(&mut self, api: &A, message: &Message) -> Option<String> {
        let text = message.text.as_deref()?;
        let telegram_id = message.from.as_ref().map_or(message.chat.id, |u| u.id);
        let conversation = self
            .conversations
            .entry(telegram_id)
            .or_insert_with(|| Conversation::new(telegram_id));
        Some(conversation.handle(api, text).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeApi;
    use habit_telegram::{Chat, User};

    fn message(chat_id: i64, from: i64, text: Option<&str>) -> Message {
        Message {
            message_id: 1,
            from: Some(User {
                id: from,
                username: None,
                first_name: Some("Ann".into()),
            }),
            chat: Chat { id: chat_id },
            text: text.map(str::to_string),
        }
    }

    fn update(update_id: i64, chat_id: i64, text: &str) -> Update {
        Update {
            update_id,
            message: Some(message(chat_id, chat_id, Some(text))),
        }
    }

    /// Replies go to a closed local port and fail fast.
    fn bot(idle: Duration) -> Arc<Bot<FakeApi>> {
        let telegram = TelegramClient::with_api_base("http://127.0.0.1:9", "123:test").unwrap();
        Arc::new(Bot::with_idle_timeout(FakeApi::default(), telegram, idle))
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..500 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn non_text_messages_are_ignored() {
        let mut sessions = Sessions::default();
        let api = FakeApi::default();
        assert!(sessions.reply(&api, &message(1, 1, None)).await.is_none());
    }

    #[tokio::test]
    async fn senders_in_one_chat_keep_separate_conversations() {
        let mut sessions = Sessions::default();
        let api = FakeApi::default();
        sessions.reply(&api, &message(-100, 1, Some("/login"))).await;

        let reply = sessions.reply(&api, &message(-100, 2, Some("alice"))).await.unwrap();
        assert!(reply.contains("/help"), "{reply}");

        let reply = sessions.reply(&api, &message(-100, 1, Some("alice"))).await.unwrap();
        assert_eq!(reply, "Enter your password:");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn a_batch_from_one_chat_is_handled_in_order() {
        let bot = bot(IDLE_TIMEOUT);
        for round in 0..50 {
            let chat_id = 5 + round;
            let username = format!("user{round}");
            let base = round * 10;
            bot.dispatch(update(base, chat_id, "/register")).await;
            bot.dispatch(update(base + 1, 900, "hello")).await;
            bot.dispatch(update(base + 2, chat_id, &username)).await;
            bot.dispatch(update(base + 3, chat_id, "correct horse")).await;

            wait_for(|| bot.api.telegram_of(&username) == Some(chat_id)).await;
        }
    }

    #[tokio::test]
    async fn idle_chat_workers_exit() {
        let bot = bot(Duration::from_millis(50));
        bot.dispatch(update(1, 5, "/login")).await;
        bot.dispatch(update(2, 6, "/help")).await;
        assert_eq!(bot.chats.lock().await.len(), 2);

        wait_for(|| bot.chats.try_lock().is_ok_and(|chats| chats.is_empty())).await;

        // a later message starts a fresh worker
        bot.dispatch(update(3, 5, "alice")).await;
        assert!(bot.chats.lock().await.contains_key(&5));
    }

    #[tokio::test]
    async fn non_text_updates_start_no_worker() {
        let bot = bot(IDLE_TIMEOUT);
        bot.dispatch(Update {
            update_id: 1,
            message: Some(message(5, 5, None)),
        })
        .await;
        bot.dispatch(Update {
            update_id: 2,
            message: None,
        })
        .await;
        assert!(bot.chats.lock().await.is_empty());
    }
}
