use std::future::Future;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use uuid::Uuid;

use habit_types::api::{
    CompleteHabitRequest, CompleteHabitResponse, CreateHabitRequest, ErrorBody,
    LinkTelegramRequest, RegisterRequest, StatusResponse, TokenResponse, UpdateHabitRequest,
};
use habit_types::models::{Habit, User};

#[derive(Debug, Error)]
pub enum ClientError {
    /// The API answered with a non-success status; `detail` is its message.
    #[error("{detail}")]
    Status { status: u16, detail: String },
    /// Missing, expired or rejected bearer token.
    #[error("not logged in")]
    Unauthorized,
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

/// The slice of the habit REST API the bot talks to.
pub trait HabitApi: Send + Sync + 'static {
    fn register(
        &self,
        req: &RegisterRequest,
    ) -> impl Future<Output = Result<User, ClientError>> + Send;

    /// Exchange credentials for a bearer token. Wrong credentials come back
    /// as a `Status` error carrying the API's message.
    fn login(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<TokenResponse, ClientError>> + Send;

    fn link_telegram(
        &self,
        token: &str,
        telegram_id: i64,
    ) -> impl Future<Output = Result<User, ClientError>> + Send;

    fn list_habits(
        &self,
        telegram_id: i64,
    ) -> impl Future<Output = Result<Vec<Habit>, ClientError>> + Send;

    fn create_habit(
        &self,
        token: &str,
        req: &CreateHabitRequest,
    ) -> impl Future<Output = Result<Habit, ClientError>> + Send;

    fn update_habit(
        &self,
        token: &str,
        habit_id: Uuid,
        req: &UpdateHabitRequest,
    ) -> impl Future<Output = Result<Habit, ClientError>> + Send;

    fn delete_habit(
        &self,
        token: &str,
        habit_id: Uuid,
        telegram_id: i64,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    fn complete_habit(
        &self,
        habit_id: Uuid,
        telegram_id: i64,
    ) -> impl Future<Output = Result<CompleteHabitResponse, ClientError>> + Send;
}

/// [`HabitApi`] over HTTP.
#[derive(Clone)]
pub struct HttpApi {
    http: Client,
    base_url: String,
}

impl HttpApi {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl HabitApi for HttpApi {
    async fn register(&self, req: &RegisterRequest) -> Result<User, ClientError> {
        send(self.http.post(self.url("/users")).json(req)).await
    }

    async fn login(&self, username: &str, password: &str) -> Result<TokenResponse, ClientError> {
        let form = [("username", username), ("password", password)];
        match send(self.http.post(self.url("/token")).form(&form)).await {
            Err(ClientError::Unauthorized) => Err(ClientError::Status {
                status: StatusCode::UNAUTHORIZED.as_u16(),
                detail: "Incorrect username or password".into(),
            }),
            other => other,
        }
    }

    async fn link_telegram(&self, token: &str, telegram_id: i64) -> Result<User, ClientError> {
        let req = self
            .http
            .put(self.url("/users/me/telegram"))
            .bearer_auth(token)
            .json(&LinkTelegramRequest { telegram_id });
        send(req).await
    }

    async fn list_habits(&self, telegram_id: i64) -> Result<Vec<Habit>, ClientError> {
        let req = self
            .http
            .get(self.url("/habits"))
            .query(&[("telegram_id", telegram_id)]);
        send(req).await
    }

    async fn create_habit(&self, token: &str, req: &CreateHabitRequest) -> Result<Habit, ClientError> {
        send(self.http.post(self.url("/habits")).bearer_auth(token).json(req)).await
    }

    async fn update_habit(
        &self,
        token: &str,
        habit_id: Uuid,
        req: &UpdateHabitRequest,
    ) -> Result<Habit, ClientError> {
        let url = self.url(&format!("/habits/{habit_id}"));
        send(self.http.put(url).bearer_auth(token).json(req)).await
    }

    async fn delete_habit(&self, token: &str, habit_id: Uuid, telegram_id: i64) -> Result<(), ClientError> {
        let req = self
            .http
            .delete(self.url(&format!("/habits/{habit_id}")))
            .bearer_auth(token)
            .query(&[("telegram_id", telegram_id)]);
        let _: StatusResponse = send(req).await?;
        Ok(())
    }

    async fn complete_habit(
        &self,
        habit_id: Uuid,
        telegram_id: i64,
    ) -> Result<CompleteHabitResponse, ClientError> {
        let req = self
            .http
            .post(self.url(&format!("/habits/{habit_id}/complete")))
            .json(&CompleteHabitRequest { telegram_id });
        send(req).await
    }
}

async fn send<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, ClientError> {
    let resp = req.send().await?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ClientError::Unauthorized);
    }

    let detail = match resp.json::<ErrorBody>().await {
        Ok(body) => body.detail,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string(),
    };
    Err(ClientError::Status {
        status: status.as_u16(),
        detail,
    })
}
