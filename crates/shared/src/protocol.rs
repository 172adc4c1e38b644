use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{Choice, GameId, GameStatus, Phase, PlayerId, UserId};

/// Wire value of `submit_vote.target_id` meaning "no target".
pub const ABSTAIN_TARGET_ID: i64 = 0;

pub type QuestionnaireAnswers = BTreeMap<String, String>;

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Applicant {
    pub player_id: PlayerId,
    pub username: String,
}

/// Stable key used to collapse duplicate roster entries: the owning user when
/// known, otherwise the per-game player record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerIdentity {
    User(UserId),
    Player(PlayerId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub username: String,
    pub current_nt: f64,
    pub current_env: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nt_before_settlement: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_env: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_settlement: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_nt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_winner: Option<bool>,
}

impl Player {
    pub fn identity(&self) -> PlayerIdentity {
        match self.user_id {
            Some(user_id) => PlayerIdentity::User(user_id),
            None => PlayerIdentity::Player(self.id),
        }
    }
}

/// Ecological change reported with a round result: a signed amount, or a
/// qualitative label in the hidden-information phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvChange {
    Amount(f64),
    Label(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    pub phase: Phase,
    pub round_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nt_before: Option<f64>,
    pub nt_after: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_before: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_after: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_change: Option<EnvChange>,
    pub round_nt_earned: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsidy_result: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phase3_broadcasts: Vec<Broadcast>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsidyApplied {
    pub message: String,
    #[serde(default)]
    pub applicants: Vec<Applicant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsidyCaught {
    pub message: String,
    #[serde(default)]
    pub caught_players: Vec<Applicant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteResult {
    pub message: String,
    pub caught: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<PlayerId>,
}

/// A transient announcement shown until the next round starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Broadcast {
    SubsidyApplied(SubsidyApplied),
    SubsidyCaught(SubsidyCaught),
    VoteResult(VoteResult),
}

impl Broadcast {
    pub fn message(&self) -> &str {
        match self {
            Broadcast::SubsidyApplied(inner) => &inner.message,
            Broadcast::SubsidyCaught(inner) => &inner.message,
            Broadcast::VoteResult(inner) => &inner.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Phase2Broadcasts {
    #[serde(default)]
    pub applicants: Vec<Applicant>,
    #[serde(default)]
    pub caught_players: Vec<Applicant>,
}

/// Push events delivered over the game channel, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    GameStarted {
        current_round: u32,
        phase: Phase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    RoundResult(RoundResult),
    NextRound {
        current_round: u32,
        phase: Phase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        players: Option<Vec<Player>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        submitted_player_ids: Option<Vec<PlayerId>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "phase2_broadcasts")]
    Phase2Broadcasts(Phase2Broadcasts),
    SubsidyApplied(SubsidyApplied),
    SubsidyCaught(SubsidyCaught),
    VoteResult(VoteResult),
    VotingStart {
        #[serde(default, deserialize_with = "null_as_empty")]
        applicants: Vec<Applicant>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vote_submitted_player_ids: Option<Vec<PlayerId>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    GameFinished {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        excel_path: Option<String>,
    },
    SubmissionStatus {
        #[serde(default)]
        submitted_player_ids: Vec<PlayerId>,
    },
    VoteSubmissionStatus {
        #[serde(default)]
        submitted_player_ids: Vec<PlayerId>,
    },
}

impl ServerEvent {
    /// Every `type` tag this client understands.
    pub const KINDS: [&'static str; 11] = [
        "game_started",
        "round_result",
        "next_round",
        "phase2_broadcasts",
        "subsidy_applied",
        "subsidy_caught",
        "vote_result",
        "voting_start",
        "game_finished",
        "submission_status",
        "vote_submission_status",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::GameStarted { .. } => "game_started",
            ServerEvent::RoundResult(_) => "round_result",
            ServerEvent::NextRound { .. } => "next_round",
            ServerEvent::Phase2Broadcasts(_) => "phase2_broadcasts",
            ServerEvent::SubsidyApplied(_) => "subsidy_applied",
            ServerEvent::SubsidyCaught(_) => "subsidy_caught",
            ServerEvent::VoteResult(_) => "vote_result",
            ServerEvent::VotingStart { .. } => "voting_start",
            ServerEvent::GameFinished { .. } => "game_finished",
            ServerEvent::SubmissionStatus { .. } => "submission_status",
            ServerEvent::VoteSubmissionStatus { .. } => "vote_submission_status",
        }
    }

    pub fn is_recognized_kind(kind: &str) -> bool {
        Self::KINDS.contains(&kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteTarget {
    Abstain,
    Player(PlayerId),
}

impl VoteTarget {
    pub fn wire_id(self) -> i64 {
        match self {
            VoteTarget::Abstain => ABSTAIN_TARGET_ID,
            VoteTarget::Player(id) => id.0,
        }
    }
}

/// Commands sent from the client over the game channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    SubmitChoice { choice: Choice, apply_subsidy: bool },
    ReadyForNextRound,
    SubmitVote { target_id: i64 },
}

impl ClientCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientCommand::SubmitChoice { .. } => "submit_choice",
            ClientCommand::ReadyForNextRound => "ready_for_next_round",
            ClientCommand::SubmitVote { .. } => "submit_vote",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUserRequest {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questionnaire_answers: Option<QuestionnaireAnswers>,
}

impl UserSummary {
    pub fn has_questionnaire(&self) -> bool {
        self.questionnaire_answers
            .as_ref()
            .is_some_and(|answers| !answers.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSummary {
    pub id: GameId,
    pub game_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<PlayerId>,
    pub status: GameStatus,
    #[serde(default)]
    pub current_round: u32,
    #[serde(default)]
    pub phase: Phase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateGameResponse {
    #[serde(flatten)]
    pub game: GameSummary,
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinGameResponse {
    pub player_id: PlayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub rejoined: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
