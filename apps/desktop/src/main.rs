mod commands;

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use client_core::{load_settings, ClientError, SessionController, ViewMode};
use commands::{parse_answer, parse_command, Command, HELP};
use shared::{
    domain::Phase,
    protocol::{Broadcast, EnvChange, QuestionnaireAnswers},
};
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Overrides `server_url` from client.toml / environment.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    username: String,
    /// Room code or numeric game id; a new room is created when omitted.
    #[arg(long)]
    room: Option<String>,
    #[arg(long = "answer", value_parser = parse_answer)]
    answers: Vec<(String, String)>,
}

fn surfaced(err: ClientError) -> anyhow::Error {
    anyhow!(err.user_message())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
        settings.ws_url = None;
    }
    let mut controller = SessionController::from_settings(&settings).map_err(surfaced)?;

    let user = controller
        .register_user(&args.username)
        .await
        .map_err(surfaced)?;
    println!("Registered as {} (user_id={})", user.username, user.id);

    if controller.needs_questionnaire() {
        if args.answers.is_empty() {
            bail!("questionnaire required: pass --answer KEY=VALUE for each question");
        }
        let answers: QuestionnaireAnswers = args.answers.into_iter().collect();
        controller
            .submit_questionnaire(answers)
            .await
            .map_err(surfaced)?;
        println!("Questionnaire submitted");
    }

    let session = match args.room.as_deref() {
        Some(room) => controller.join_game(room).await,
        None => controller.create_game().await,
    }
    .map_err(surfaced)?;
    println!(
        "In room {} (game_id={}, player_id={})",
        session.game().game_code,
        session.game().id,
        session.player_id()
    );
    println!("{HELP}");
    render(&controller);

    let mut lines = BufReader::new(stdin()).lines();
    loop {
        let in_game = controller.session().is_some();
        tokio::select! {
            update = controller.next_update(), if in_game => {
                if update.is_some() {
                    render(&controller);
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => run_command(&mut controller, command).await,
                    Err(err) => println!("{err}"),
                }
            }
        }
    }

    controller.leave_game().await;
    Ok(())
}

async fn run_command(controller: &mut SessionController, command: Command) {
    let outcome = match command {
        Command::Start => controller.start_game().await.map(|()| None),
        Command::Enter => {
            controller.dismiss_phase_intro();
            Ok(None)
        }
        Command::Choose {
            choice,
            apply_subsidy,
        } => controller.submit_choice(choice, apply_subsidy).map(Some),
        Command::Vote(target) => controller.submit_vote(target).map(Some),
        Command::Ready => controller.mark_ready_for_next_round().map(Some),
        Command::Refresh => controller.load_state().await.map(|_| None),
        Command::Results => match controller.fetch_results().await {
            Ok(players) => {
                for player in players {
                    println!(
                        "  {:<16} final_nt={:>8.2} env_settlement={:>8.2}{}",
                        player.username,
                        player.final_nt.unwrap_or(player.current_nt),
                        player.env_settlement.unwrap_or_default(),
                        if player.is_winner == Some(true) { "  winner" } else { "" }
                    );
                }
                Ok(None)
            }
            Err(err) => Err(err),
        },
        Command::Leave => {
            controller.leave_game().await;
            println!("Left the game; restart to join another room");
            Ok(None)
        }
        Command::Help => {
            println!("{HELP}");
            Ok(None)
        }
        Command::Quit => Ok(None),
    };
    match outcome {
        Ok(Some(client_core::CommandOutcome::Dropped)) => {
            println!("Not connected to the game; action was not sent")
        }
        Ok(_) => render(controller),
        Err(err) => println!("{}", err.user_message()),
    }
}

fn render(controller: &SessionController) {
    let Some(state) = controller.state() else {
        println!("[lobby] not in a game");
        return;
    };
    if let Some(notice) = &state.last_notice {
        println!("  notice: {notice}");
    }
    if let Some(broadcast) = &state.broadcast {
        println!("  broadcast: {}", broadcast_line(broadcast));
    }
    match controller.view() {
        ViewMode::Lobby => {
            let names: Vec<&str> = state.players.iter().map(|p| p.username.as_str()).collect();
            println!("[lobby] {} player(s): {}", names.len(), names.join(", "));
        }
        ViewMode::PhaseIntro(phase) => {
            println!(
                "[phase {phase}] rounds {}-{}; type 'enter' to begin",
                phase.first_round(),
                phase.last_round()
            )
        }
        ViewMode::ChoiceSubmission {
            phase,
            subsidy_available,
        } => {
            let subsidy = if subsidy_available { " [subsidy]" } else { "" };
            println!(
                "[round {} / phase {phase}] choose organic|inorganic{subsidy}",
                state.current_round
            );
        }
        ViewMode::WaitingForOthers => println!(
            "[round {}] waiting for others ({} submitted)",
            state.current_round,
            state.submitted_player_ids.len()
        ),
        ViewMode::VotingPrompt => {
            let applicants: Vec<String> = state
                .voting_applicants
                .iter()
                .map(|a| format!("{}={}", a.player_id, a.username))
                .collect();
            println!("[vote] applicants: {}; vote <id>|none", applicants.join(", "));
        }
        ViewMode::VotingWait => println!(
            "[vote] waiting for votes ({} in)",
            state.vote_submitted_player_ids.len()
        ),
        ViewMode::RoundResult {
            phase,
            ready_confirmed,
        } => {
            if let Some(result) = &state.round_result {
                let env = match &result.env_change {
                    Some(EnvChange::Amount(amount)) => format!("{amount:+.2}"),
                    Some(EnvChange::Label(label)) => label.clone(),
                    None => "-".to_string(),
                };
                println!(
                    "[result round {} / phase {phase}] nt={:.2} (+{:.2}) env change {env}",
                    result.round_number, result.nt_after, result.round_nt_earned
                );
                if let Some(subsidy) = &result.subsidy_result {
                    println!("  subsidy: {subsidy}");
                }
            }
            if phase != Phase::One && !ready_confirmed {
                println!("  type 'ready' to continue");
            }
        }
        ViewMode::Results => println!("[finished] type 'results' for final standings"),
    }
}

fn broadcast_line(broadcast: &Broadcast) -> String {
    match broadcast {
        Broadcast::SubsidyCaught(caught) if !caught.caught_players.is_empty() => {
            let names: Vec<&str> = caught
                .caught_players
                .iter()
                .map(|p| p.username.as_str())
                .collect();
            format!("{} ({})", caught.message, names.join(", "))
        }
        other => other.message().to_string(),
    }
}
