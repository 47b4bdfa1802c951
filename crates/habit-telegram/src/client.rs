use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::types::{ApiResponse, GetUpdates, SendMessage, Update};

const API_BASE: &str = "https://api.telegram.org";

/// Long-poll timeout handed to `getUpdates`, in seconds.
pub const POLL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("telegram request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram API error: {0}")]
    Api(String),
}

/// Thin Bot API client. Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct TelegramClient {
    http: Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(token: &str) -> Result<Self, TelegramError> {
        Self::with_api_base(API_BASE, token)
    }

    /// Point the client at a different Bot API server (e.g. a local one).
    pub fn with_api_base(api_base: &str, token: &str) -> Result<Self, TelegramError> {
        let http = Client::builder()
            // must outlive the long-poll window
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()?;
        Ok(Self {
            http,
            base_url: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        })
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        let _: serde_json::Value = self.call("sendMessage", &SendMessage { chat_id, text }).await?;
        debug!(chat_id, "Telegram message sent");
        Ok(())
    }

    /// Fetch updates after `offset`, waiting up to [`POLL_TIMEOUT_SECS`].
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TelegramError> {
        self.call(
            "getUpdates",
            &GetUpdates {
                offset,
                timeout: POLL_TIMEOUT_SECS,
                allowed_updates: &["message"],
            },
        )
        .await
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T, TelegramError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp: ApiResponse<T> = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .json(body)
            .send()
            .await?
            .json()
            .await?;

        if !resp.ok {
            return Err(TelegramError::Api(
                resp.description.unwrap_or_else(|| format!("{method} failed")),
            ));
        }
        resp.result
            .ok_or_else(|| TelegramError::Api(format!("{method} returned no result")))
    }
}
