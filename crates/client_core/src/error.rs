use shared::{domain::PlayerId, error::ApiError};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::config::ConfigError;

/// Local checks that reject an action before anything reaches the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("please enter a username")]
    EmptyUsername,
    #[error("please register a username first")]
    NotRegistered,
    #[error("please answer the questionnaire before submitting")]
    EmptyQuestionnaire,
    #[error("the questionnaire has already been submitted")]
    QuestionnaireAlreadySubmitted,
    #[error("please enter a room code")]
    EmptyRoomCode,
    #[error("you are not in a game")]
    NoActiveGame,
    #[error("the game has already started")]
    GameAlreadyStarted,
    #[error("the game is not in progress")]
    GameNotPlaying,
    #[error("the game has not finished yet")]
    GameNotFinished,
    #[error("only the room creator can start the game")]
    NotCreator,
    #[error("at least two players are needed to start")]
    NotEnoughPlayers,
    #[error("please choose a fertilizer first")]
    NoChoiceSelected,
    #[error("subsidies are not available in this phase")]
    SubsidyUnavailable,
    #[error("you have already submitted a choice this round")]
    ChoiceAlreadySubmitted,
    #[error("this round has already been settled")]
    RoundAlreadySettled,
    #[error("voting is not open")]
    VotingClosed,
    #[error("you have already voted this round")]
    VoteAlreadySubmitted,
    #[error("player {0} did not apply for a subsidy this round")]
    UnknownVoteTarget(PlayerId),
    #[error("there is no round result to confirm")]
    NoResultToConfirm,
    #[error("you have already confirmed this round")]
    ReadyAlreadyConfirmed,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to connect websocket {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("game channel is not open")]
    NotOpen,
    #[error("failed to encode command")]
    Encode,
}

/// Why an inbound frame was dropped instead of delivered.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("unrecognized event type '{0}'")]
    UnrecognizedType(String),
    #[error("invalid '{kind}' payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid server response: {0}")]
    Decode(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Text suitable for showing to the player. Server-provided detail wins
    /// over generic wording.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Validation(err) => err.to_string(),
            ClientError::Api(err) if !err.message.trim().is_empty() => err.message.clone(),
            ClientError::Api(err) if err.is_not_found() => {
                "room not found, check the code and try again".to_string()
            }
            ClientError::Api(err) => format!("request rejected by server (status {})", err.status),
            ClientError::Transport(err) if err.is_connect() || err.is_timeout() => {
                "server unreachable, check the address and your network".to_string()
            }
            ClientError::Transport(err) => format!("request failed: {err}"),
            ClientError::Decode(_) => "the server sent an unexpected response".to_string(),
            ClientError::Config(err) => err.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Api(err) if err.is_not_found())
    }
}
