use shared::{
    domain::{Choice, PlayerId},
    protocol::VoteTarget,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Enter,
    Choose {
        choice: Option<Choice>,
        apply_subsidy: bool,
    },
    Vote(VoteTarget),
    Ready,
    Refresh,
    Results,
    Leave,
    Quit,
    Help,
}

pub const HELP: &str = concat!(
    "commands: start | enter | choose organic|inorganic [subsidy] | ",
    "vote <player_id>|none | ready | refresh | results | leave | quit"
);

pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".to_string());
    };
    let rest: Vec<&str> = words.collect();
    match (head.to_ascii_lowercase().as_str(), rest.as_slice()) {
        ("start", []) => Ok(Command::Start),
        ("enter", []) => Ok(Command::Enter),
        ("choose", []) => Ok(Command::Choose {
            choice: None,
            apply_subsidy: false,
        }),
        ("choose", [choice]) => Ok(Command::Choose {
            choice: Some(choice.parse()?),
            apply_subsidy: false,
        }),
        ("choose", [choice, flag]) if flag.eq_ignore_ascii_case("subsidy") => {
            Ok(Command::Choose {
                choice: Some(choice.parse()?),
                apply_subsidy: true,
            })
        }
        ("vote", [target]) if target.eq_ignore_ascii_case("none") => {
            Ok(Command::Vote(VoteTarget::Abstain))
        }
        ("vote", [target]) => target
            .parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
            .map(|id| Command::Vote(VoteTarget::Player(PlayerId(id))))
            .ok_or_else(|| format!("invalid vote target '{target}'")),
        ("ready", []) => Ok(Command::Ready),
        ("refresh", []) => Ok(Command::Refresh),
        ("results", []) => Ok(Command::Results),
        ("leave", []) => Ok(Command::Leave),
        ("quit" | "exit", []) => Ok(Command::Quit),
        ("help", _) => Ok(Command::Help),
        _ => Err(format!("unrecognized command '{}'", line.trim())),
    }
}

/// `KEY=VALUE` from a repeated `--answer` flag.
pub fn parse_answer(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let (key, value) = (key.trim(), value.trim());
    if key.is_empty() || value.is_empty() {
        return Err(format!("expected KEY=VALUE, got '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
