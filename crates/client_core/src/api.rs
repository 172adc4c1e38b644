use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{GameId, PlayerId, UserId},
    error::{ApiError, ErrorBody},
    protocol::{
        CreateGameResponse, GameSummary, JoinGameResponse, MessageResponse, Player,
        QuestionnaireAnswers, RegisterUserRequest, UserSummary,
    },
};
use tracing::debug;
use url::Url;

use crate::{
    config::{ClientSettings, ConfigError},
    error::ClientError,
};

/// Request/response calls against the game server's REST surface.
#[async_trait]
pub trait GameApi: Send + Sync {
    async fn register_user(&self, username: &str) -> Result<UserSummary, ClientError>;
    async fn submit_questionnaire(
        &self,
        user_id: UserId,
        answers: &QuestionnaireAnswers,
    ) -> Result<(), ClientError>;
    async fn create_game(&self, user: &UserSummary) -> Result<CreateGameResponse, ClientError>;
    async fn join_game(
        &self,
        game_id: GameId,
        user: &UserSummary,
    ) -> Result<JoinGameResponse, ClientError>;
    async fn fetch_game(&self, game_id: GameId) -> Result<GameSummary, ClientError>;
    async fn fetch_game_by_code(&self, code: &str) -> Result<GameSummary, ClientError>;
    async fn fetch_players(&self, game_id: GameId) -> Result<Vec<Player>, ClientError>;
    async fn start_game(&self, game_id: GameId, player_id: PlayerId) -> Result<(), ClientError>;
}

pub struct HttpGameApi {
    http: Client,
    base_url: Url,
}

impl HttpGameApi {
    pub fn new(api_base_url: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(api_base_url).map_err(|err| ConfigError::InvalidServerUrl {
            url: api_base_url.to_string(),
            reason: err.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::UnsupportedScheme(api_base_url.to_string()).into());
        }
        Ok(Self {
            http: Client::new(),
            base_url,
        })
    }

    pub fn from_settings(settings: &ClientSettings) -> Result<Self, ClientError> {
        Self::new(&settings.api_base_url()?)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ConfigError::UnsupportedScheme(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|err| ClientError::Decode(err.to_string()));
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|body| body.message())
            .or_else(|| status.canonical_reason().map(str::to_string))
            .unwrap_or_default();
        debug!(status = status.as_u16(), "api: request rejected: {message}");
        Err(ApiError::new(status.as_u16(), message).into())
    }
}

#[async_trait]
impl GameApi for HttpGameApi {
    async fn register_user(&self, username: &str) -> Result<UserSummary, ClientError> {
        let response = self
            .http
            .post(self.endpoint(&["users", "register"])?)
            .json(&RegisterUserRequest {
                username: username.to_string(),
            })
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn submit_questionnaire(
        &self,
        user_id: UserId,
        answers: &QuestionnaireAnswers,
    ) -> Result<(), ClientError> {
        let user_id = user_id.to_string();
        let response = self
            .http
            .post(self.endpoint(&["users", &user_id, "questionnaire"])?)
            .json(answers)
            .send()
            .await?;
        Self::decode::<MessageResponse>(response).await.map(|_| ())
    }

    async fn create_game(&self, user: &UserSummary) -> Result<CreateGameResponse, ClientError> {
        let response = self
            .http
            .post(self.endpoint(&["games", "create"])?)
            .query(&[("user_id", user.id.0)])
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn join_game(
        &self,
        game_id: GameId,
        user: &UserSummary,
    ) -> Result<JoinGameResponse, ClientError> {
        let game_id = game_id.to_string();
        let response = self
            .http
            .post(self.endpoint(&["games", &game_id, "join"])?)
            .query(&[("user_id", user.id.0)])
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn fetch_game(&self, game_id: GameId) -> Result<GameSummary, ClientError> {
        let game_id = game_id.to_string();
        let response = self
            .http
            .get(self.endpoint(&["games", &game_id])?)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn fetch_game_by_code(&self, code: &str) -> Result<GameSummary, ClientError> {
        let response = self
            .http
            .get(self.endpoint(&["games", "by-code", code])?)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn fetch_players(&self, game_id: GameId) -> Result<Vec<Player>, ClientError> {
        let game_id = game_id.to_string();
        let response = self
            .http
            .get(self.endpoint(&["games", &game_id, "players"])?)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn start_game(&self, game_id: GameId, player_id: PlayerId) -> Result<(), ClientError> {
        let game_id = game_id.to_string();
        let response = self
            .http
            .post(self.endpoint(&["games", &game_id, "start"])?)
            .query(&[("player_id", player_id.0)])
            .send()
            .await?;
        Self::decode::<MessageResponse>(response).await.map(|_| ())
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
