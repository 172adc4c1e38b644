use std::{fmt, ops::RangeInclusive};

use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(GameId);
id_newtype!(PlayerId);

/// Rounds in every phase. Phase boundaries are fixed by the game rules.
pub const ROUNDS_PER_PHASE: u32 = 5;
pub const TOTAL_ROUNDS: u32 = ROUNDS_PER_PHASE * 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    #[default]
    Waiting,
    Playing,
    Finished,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("phase must be 1, 2 or 3, got {0}")]
pub struct InvalidPhase(pub u8);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum Phase {
    /// Rounds 1-5: hidden information, no subsidy.
    #[default]
    One,
    /// Rounds 6-10: subsidy available, no voting.
    Two,
    /// Rounds 11-15: subsidy plus peer voting.
    Three,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::One, Phase::Two, Phase::Three];

    pub fn number(self) -> u8 {
        match self {
            Phase::One => 1,
            Phase::Two => 2,
            Phase::Three => 3,
        }
    }

    pub fn first_round(self) -> u32 {
        (u32::from(self.number()) - 1) * ROUNDS_PER_PHASE + 1
    }

    pub fn last_round(self) -> u32 {
        u32::from(self.number()) * ROUNDS_PER_PHASE
    }

    pub fn rounds(self) -> RangeInclusive<u32> {
        self.first_round()..=self.last_round()
    }

    pub fn subsidy_available(self) -> bool {
        self != Phase::One
    }

    pub fn voting_enabled(self) -> bool {
        self == Phase::Three
    }

    /// The phase a round belongs to, or `None` outside `1..=TOTAL_ROUNDS`.
    pub fn for_round(round: u32) -> Option<Phase> {
        Phase::ALL
            .into_iter()
            .find(|phase| phase.rounds().contains(&round))
    }
}

impl TryFrom<u8> for Phase {
    type Error = InvalidPhase;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Phase::One),
            2 => Ok(Phase::Two),
            3 => Ok(Phase::Three),
            other => Err(InvalidPhase(other)),
        }
    }
}

impl From<Phase> for u8 {
    fn from(value: Phase) -> Self {
        value.number()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.number().fmt(f)
    }
}

/// True for rounds 1, 6 and 11.
pub fn is_first_round_of_phase(round: u32) -> bool {
    Phase::for_round(round).is_some_and(|phase| phase.first_round() == round)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Choice {
    Organic,
    Inorganic,
}

impl std::str::FromStr for Choice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "organic" => Ok(Choice::Organic),
            "inorganic" => Ok(Choice::Inorganic),
            other => Err(format!("unknown choice '{other}'")),
        }
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
