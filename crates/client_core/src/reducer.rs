use std::{collections::HashSet, fmt};

use shared::{
    domain::{GameStatus, Phase, PlayerId},
    protocol::{
        Applicant, Broadcast, GameSummary, Phase2Broadcasts, Player, RoundResult, ServerEvent,
    },
};

use crate::connection::InboundEvent;

/// Client-side view of one game. Only ever replaced by [`reduce`] / [`fold`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    pub players: Vec<Player>,
    pub status: GameStatus,
    pub current_round: u32,
    pub phase: Phase,
    pub round_result: Option<RoundResult>,
    pub broadcast: Option<Broadcast>,
    pub phase2_broadcasts: Option<Phase2Broadcasts>,
    pub voting_phase: bool,
    pub voting_applicants: Vec<Applicant>,
    pub submitted_player_ids: Vec<PlayerId>,
    pub vote_submitted_player_ids: Vec<PlayerId>,
    /// Latest human-readable message carried by a push event.
    pub last_notice: Option<String>,
    pub last_seq: Option<u64>,
}

impl SessionState {
    pub fn is_playing(&self) -> bool {
        self.status == GameStatus::Playing
    }
}

/// Authoritative state pulled over REST.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub players: Vec<Player>,
    pub status: GameStatus,
    pub current_round: u32,
    pub phase: Phase,
}

impl Snapshot {
    pub fn from_pull(game: &GameSummary, players: Vec<Player>) -> Self {
        Self {
            players,
            status: game.status,
            current_round: game.current_round,
            phase: game.phase,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    Push(InboundEvent),
    Snapshot(Snapshot),
    RosterRefreshed(Vec<Player>),
}

impl SessionInput {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionInput::Push(inbound) => inbound.event.kind(),
            SessionInput::Snapshot(_) => "snapshot",
            SessionInput::RosterRefreshed(_) => "roster_refresh",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    OutOfSequence { seq: u64, last: u64 },
    NotPlaying(GameStatus),
    StaleRound { event_round: u32, current_round: u32 },
    Regression { round: u32, phase: Phase },
    GameOver,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::OutOfSequence { seq, last } => {
                write!(f, "sequence {seq} is not after {last}")
            }
            IgnoreReason::NotPlaying(status) => write!(f, "game status is {status:?}"),
            IgnoreReason::StaleRound {
                event_round,
                current_round,
            } => write!(f, "result for round {event_round} while in round {current_round}"),
            IgnoreReason::Regression { round, phase } => {
                write!(f, "would move back to round {round} phase {phase}")
            }
            IgnoreReason::GameOver => write!(f, "game already finished"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Applied,
    Ignored(IgnoreReason),
}

pub fn reduce(state: SessionState, input: SessionInput) -> SessionState {
    fold(state, input).0
}

/// Same as [`reduce`], also reporting whether the input changed anything.
pub fn fold(state: SessionState, input: SessionInput) -> (SessionState, Disposition) {
    match input {
        SessionInput::Snapshot(snapshot) => (apply_snapshot(state, snapshot), Disposition::Applied),
        SessionInput::RosterRefreshed(players) => (
            SessionState {
                players: dedup_players(players),
                ..state
            },
            Disposition::Applied,
        ),
        SessionInput::Push(inbound) => apply_push(state, inbound),
    }
}

/// Keeps the first entry per identity, preserving order.
pub fn dedup_players(players: Vec<Player>) -> Vec<Player> {
    let mut seen = HashSet::new();
    players
        .into_iter()
        .filter(|player| seen.insert(player.identity()))
        .collect()
}

fn apply_snapshot(state: SessionState, snapshot: Snapshot) -> SessionState {
    SessionState {
        players: dedup_players(snapshot.players),
        status: snapshot.status,
        current_round: snapshot.current_round,
        phase: snapshot.phase,
        ..state
    }
}

fn apply_push(mut state: SessionState, inbound: InboundEvent) -> (SessionState, Disposition) {
    if let Some(seq) = inbound.seq {
        if let Some(last) = state.last_seq.filter(|last| seq <= *last) {
            return (
                state,
                Disposition::Ignored(IgnoreReason::OutOfSequence { seq, last }),
            );
        }
        state.last_seq = Some(seq);
    }
    apply_event(state, inbound.event)
}

fn ignored(state: SessionState, reason: IgnoreReason) -> (SessionState, Disposition) {
    (state, Disposition::Ignored(reason))
}

fn moves_backwards(state: &SessionState, round: u32, phase: Phase) -> bool {
    round < state.current_round || phase < state.phase
}

fn apply_event(mut state: SessionState, event: ServerEvent) -> (SessionState, Disposition) {
    if state.status == GameStatus::Finished && !matches!(event, ServerEvent::GameFinished { .. })
    {
        return ignored(state, IgnoreReason::GameOver);
    }
    let round_scoped = !matches!(
        event,
        ServerEvent::GameStarted { .. } | ServerEvent::GameFinished { .. }
    );
    if round_scoped && !state.is_playing() {
        let status = state.status;
        return ignored(state, IgnoreReason::NotPlaying(status));
    }

    match event {
        ServerEvent::GameStarted {
            current_round,
            phase,
            message,
        } => {
            if moves_backwards(&state, current_round, phase) {
                return ignored(
                    state,
                    IgnoreReason::Regression {
                        round: current_round,
                        phase,
                    },
                );
            }
            state.status = GameStatus::Playing;
            state.current_round = current_round;
            state.phase = phase;
            state.last_notice = message.or(state.last_notice);
        }
        ServerEvent::RoundResult(result) => {
            if result.round_number != state.current_round {
                let current_round = state.current_round;
                return ignored(
                    state,
                    IgnoreReason::StaleRound {
                        event_round: result.round_number,
                        current_round,
                    },
                );
            }
            state.round_result = Some(result);
            state.voting_phase = false;
        }
        ServerEvent::NextRound {
            current_round,
            phase,
            players,
            submitted_player_ids,
            message,
        } => {
            if moves_backwards(&state, current_round, phase) {
                return ignored(
                    state,
                    IgnoreReason::Regression {
                        round: current_round,
                        phase,
                    },
                );
            }
            state.current_round = current_round;
            state.phase = phase;
            state.round_result = None;
            state.broadcast = None;
            state.phase2_broadcasts = None;
            state.voting_phase = false;
            if let Some(players) = players {
                state.players = dedup_players(players);
            }
            if let Some(ids) = submitted_player_ids {
                state.submitted_player_ids = ids;
            }
            state.last_notice = message.or(state.last_notice);
        }
        ServerEvent::Phase2Broadcasts(broadcasts) => {
            state.phase2_broadcasts = Some(broadcasts);
        }
        ServerEvent::SubsidyApplied(payload) => {
            state.broadcast = Some(Broadcast::SubsidyApplied(payload));
        }
        ServerEvent::SubsidyCaught(payload) => {
            state.broadcast = Some(Broadcast::SubsidyCaught(payload));
        }
        ServerEvent::VoteResult(payload) => {
            state.broadcast = Some(Broadcast::VoteResult(payload));
        }
        ServerEvent::VotingStart {
            applicants,
            vote_submitted_player_ids,
            message,
        } => {
            state.voting_phase = true;
            state.voting_applicants = applicants;
            if let Some(ids) = vote_submitted_player_ids {
                state.vote_submitted_player_ids = ids;
            }
            state.last_notice = message.or(state.last_notice);
        }
        ServerEvent::GameFinished { message, .. } => {
            state.status = GameStatus::Finished;
            state.last_notice = message.or(state.last_notice);
        }
        ServerEvent::SubmissionStatus {
            submitted_player_ids,
        } => {
            state.submitted_player_ids = submitted_player_ids;
        }
        ServerEvent::VoteSubmissionStatus {
            submitted_player_ids,
        } => {
            state.vote_submitted_player_ids = submitted_player_ids;
        }
    }
    (state, Disposition::Applied)
}

#[cfg(test)]
#[path = "tests/reducer_tests.rs"]
mod tests;
