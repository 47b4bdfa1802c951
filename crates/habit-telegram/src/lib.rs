//! Minimal Telegram Bot API client: long polling for the bot and
//! `sendMessage` for both the bot and the reminder notifier.

pub mod client;
pub mod types;

pub use client::{TelegramClient, TelegramError};
pub use types::{Chat, Message, Update, User};
