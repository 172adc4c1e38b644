use shared::domain::{GameStatus, Phase};

use crate::reducer::SessionState;

/// Device-local, non-authoritative UI flags. Round-scoped flags record the
/// round they were set in so they lapse on their own when the round moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalFlags {
    pub dismissed_intro: Option<Phase>,
    pub choice_submitted_round: Option<u32>,
    pub vote_submitted_round: Option<u32>,
    pub ready_round: Option<u32>,
}

impl LocalFlags {
    pub fn intro_dismissed(&self, phase: Phase) -> bool {
        self.dismissed_intro.is_some_and(|dismissed| dismissed >= phase)
    }

    pub fn choice_submitted(&self, round: u32) -> bool {
        self.choice_submitted_round == Some(round)
    }

    pub fn vote_submitted(&self, round: u32) -> bool {
        self.vote_submitted_round == Some(round)
    }

    pub fn ready_confirmed(&self, round: u32) -> bool {
        self.ready_round == Some(round)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Lobby,
    PhaseIntro(Phase),
    ChoiceSubmission {
        phase: Phase,
        subsidy_available: bool,
    },
    WaitingForOthers,
    VotingPrompt,
    VotingWait,
    RoundResult {
        phase: Phase,
        ready_confirmed: bool,
    },
    Results,
}

/// First matching rule wins. Voting is checked before the round result: a
/// `voting_start` always arrives after the `round_result` it follows.
pub fn select_view(session: Option<&SessionState>, flags: &LocalFlags) -> ViewMode {
    let Some(state) = session else {
        return ViewMode::Lobby;
    };
    match state.status {
        GameStatus::Waiting => return ViewMode::Lobby,
        GameStatus::Finished => return ViewMode::Results,
        GameStatus::Playing => {}
    }

    let phase = state.phase;
    let round = state.current_round;

    if phase.first_round() == round && !flags.intro_dismissed(phase) {
        return ViewMode::PhaseIntro(phase);
    }
    if phase.voting_enabled() && state.voting_phase {
        return if flags.vote_submitted(round) {
            ViewMode::VotingWait
        } else {
            ViewMode::VotingPrompt
        };
    }
    if let Some(result) = &state.round_result {
        return ViewMode::RoundResult {
            phase: result.phase,
            ready_confirmed: flags.ready_confirmed(round),
        };
    }
    if flags.choice_submitted(round) {
        return ViewMode::WaitingForOthers;
    }
    ViewMode::ChoiceSubmission {
        phase,
        subsidy_available: phase.subsidy_available(),
    }
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
