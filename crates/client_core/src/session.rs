use std::{sync::Arc, time::Duration};

use shared::{
    domain::{Choice, GameId, GameStatus, PlayerId},
    protocol::{ClientCommand, GameSummary, Player, QuestionnaireAnswers, UserSummary, VoteTarget},
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    api::{GameApi, HttpGameApi},
    config::ClientSettings,
    connection::{ChannelKey, ConnectionHandle, ConnectionManager, EventCallback},
    error::{ClientError, ValidationError},
    reducer::{dedup_players, fold, Disposition, SessionInput, SessionState, Snapshot},
    view::{select_view, LocalFlags, ViewMode},
};

/// How the player typed the room they want to join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameIdentifier {
    Id(GameId),
    Code(String),
}

impl GameIdentifier {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyRoomCode);
        }
        // Leading zeros mark a room code: "012345" is not game 12345.
        match trimmed.parse::<i64>() {
            Ok(id) if id > 0 && id.to_string() == trimmed => Ok(GameIdentifier::Id(GameId(id))),
            _ => Ok(GameIdentifier::Code(trimmed.to_ascii_uppercase())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Sent,
    /// The channel was not open; nothing was queued.
    Dropped,
}

pub struct GameSession {
    game: GameSummary,
    player_id: PlayerId,
    state: SessionState,
    channel: Option<ConnectionHandle>,
    inbox: mpsc::UnboundedReceiver<SessionInput>,
    inbox_tx: mpsc::UnboundedSender<SessionInput>,
    poller: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for GameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSession")
            .field("game_id", &self.game.id)
            .field("player_id", &self.player_id)
            .field("status", &self.state.status)
            .field("connected", &self.is_connected())
            .field("polling", &self.poller.is_some())
            .finish_non_exhaustive()
    }
}

impl GameSession {
    pub fn game(&self) -> &GameSummary {
        &self.game
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Games without a recorded creator let anyone start them.
    pub fn is_creator(&self) -> bool {
        match self.game.creator_id {
            Some(creator_id) => creator_id == self.player_id,
            None => true,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.channel.as_ref().is_some_and(ConnectionHandle::is_open)
    }

    fn stop_polling(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
            debug!(game_id = self.game.id.0, "session: lobby polling stopped");
        }
    }
}

impl Drop for GameSession {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

/// Owns the single active game session. Every state change, whether a push,
/// a pull or a local action, goes through `&mut self`, so reducer
/// applications are serialized.
pub struct SessionController {
    api: Arc<dyn GameApi>,
    connections: ConnectionManager,
    lobby_poll_interval: Duration,
    user: Option<UserSummary>,
    session: Option<GameSession>,
    flags: LocalFlags,
    view: ViewMode,
}

impl SessionController {
    pub fn new(
        api: Arc<dyn GameApi>,
        connections: ConnectionManager,
        lobby_poll_interval: Duration,
    ) -> Self {
        Self {
            api,
            connections,
            lobby_poll_interval,
            user: None,
            session: None,
            flags: LocalFlags::default(),
            view: ViewMode::Lobby,
        }
    }

    pub fn from_settings(settings: &ClientSettings) -> Result<Self, ClientError> {
        let api = HttpGameApi::from_settings(settings)?;
        let connections = ConnectionManager::new(settings.ws_base_url()?);
        Ok(Self::new(
            Arc::new(api),
            connections,
            settings.lobby_poll_interval(),
        ))
    }

    pub fn user(&self) -> Option<&UserSummary> {
        self.user.as_ref()
    }

    pub fn session(&self) -> Option<&GameSession> {
        self.session.as_ref()
    }

    pub fn state(&self) -> Option<&SessionState> {
        self.session.as_ref().map(GameSession::state)
    }

    pub fn flags(&self) -> &LocalFlags {
        &self.flags
    }

    pub fn view(&self) -> ViewMode {
        self.view
    }

    pub async fn register_user(&mut self, username: &str) -> Result<&UserSummary, ClientError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ValidationError::EmptyUsername.into());
        }
        let user = self.api.register_user(username).await?;
        info!(user_id = user.id.0, "session: registered user");
        Ok(&*self.user.insert(user))
    }

    pub fn needs_questionnaire(&self) -> bool {
        self.user
            .as_ref()
            .is_some_and(|user| !user.has_questionnaire())
    }

    /// Answers are recorded once per user.
    pub async fn submit_questionnaire(
        &mut self,
        answers: QuestionnaireAnswers,
    ) -> Result<(), ClientError> {
        let user = self.user.as_ref().ok_or(ValidationError::NotRegistered)?;
        if user.has_questionnaire() {
            return Err(ValidationError::QuestionnaireAlreadySubmitted.into());
        }
        if answers.is_empty() || answers.values().any(|answer| answer.trim().is_empty()) {
            return Err(ValidationError::EmptyQuestionnaire.into());
        }
        self.api.submit_questionnaire(user.id, &answers).await?;
        info!(user_id = user.id.0, "session: questionnaire submitted");
        if let Some(user) = self.user.as_mut() {
            user.questionnaire_answers = Some(answers);
        }
        Ok(())
    }

    pub async fn create_game(&mut self) -> Result<&GameSession, ClientError> {
        let user = self.registered_user()?;
        let created = self.api.create_game(&user).await?;
        let players = self.api.fetch_players(created.game.id).await?;
        info!(
            game_id = created.game.id.0,
            game_code = %created.game.game_code,
            "session: created game"
        );
        Ok(self.enter_game(created.game, created.player_id, players).await)
    }

    /// Accepts a numeric game id or a room code. Nothing changes locally
    /// unless every pull succeeds.
    pub async fn join_game(&mut self, room: &str) -> Result<&GameSession, ClientError> {
        let identifier = GameIdentifier::parse(room)?;
        let user = self.registered_user()?;
        let found = self.resolve_game(&identifier, room).await?;
        let joined = self.api.join_game(found.id, &user).await?;
        let game = self.api.fetch_game(found.id).await?;
        let players = self.api.fetch_players(found.id).await?;
        info!(
            game_id = game.id.0,
            player_id = joined.player_id.0,
            rejoined = joined.rejoined,
            "session: joined game"
        );
        Ok(self.enter_game(game, joined.player_id, players).await)
    }

    /// Re-pulls the game and roster and applies them as a snapshot.
    pub async fn load_state(&mut self) -> Result<ViewMode, ClientError> {
        let game_id = self.active_session()?.game.id;
        let game = self.api.fetch_game(game_id).await?;
        let players = self.api.fetch_players(game_id).await?;
        let snapshot = Snapshot::from_pull(&game, players);
        if let Some(session) = self.session.as_mut() {
            session.game = game;
        }
        self.apply_input(SessionInput::Snapshot(snapshot)).await;

        if let Some(session) = self.session.as_mut() {
            if session.state.status == GameStatus::Waiting && session.poller.is_none() {
                session.poller = Some(spawn_roster_poller(
                    Arc::clone(&self.api),
                    session.game.id,
                    self.lobby_poll_interval,
                    session.inbox_tx.clone(),
                ));
            }
        }
        Ok(self.view)
    }

    pub async fn start_game(&mut self) -> Result<(), ClientError> {
        let session = self.active_session()?;
        if session.state.status != GameStatus::Waiting {
            return Err(ValidationError::GameAlreadyStarted.into());
        }
        if !session.is_creator() {
            return Err(ValidationError::NotCreator.into());
        }
        if session.state.players.len() < 2 {
            return Err(ValidationError::NotEnoughPlayers.into());
        }
        let (game_id, player_id) = (session.game.id, session.player_id);
        self.api.start_game(game_id, player_id).await?;
        info!(game_id = game_id.0, "session: start requested");
        Ok(())
    }

    /// `choice` is `None` when the player pressed submit without picking.
    pub fn submit_choice(
        &mut self,
        choice: Option<Choice>,
        apply_subsidy: bool,
    ) -> Result<CommandOutcome, ClientError> {
        let session = self.playing_session()?;
        let round = session.state.current_round;
        let choice = choice.ok_or(ValidationError::NoChoiceSelected)?;
        if apply_subsidy && !session.state.phase.subsidy_available() {
            return Err(ValidationError::SubsidyUnavailable.into());
        }
        if session.state.round_result.is_some() {
            return Err(ValidationError::RoundAlreadySettled.into());
        }
        if self.flags.choice_submitted(round) {
            return Err(ValidationError::ChoiceAlreadySubmitted.into());
        }
        let outcome = self.dispatch(
            session,
            ClientCommand::SubmitChoice {
                choice,
                apply_subsidy,
            },
        );
        if outcome == CommandOutcome::Sent {
            self.flags.choice_submitted_round = Some(round);
        }
        self.refresh_view();
        Ok(outcome)
    }

    pub fn submit_vote(&mut self, target: VoteTarget) -> Result<CommandOutcome, ClientError> {
        let session = self.playing_session()?;
        let state = &session.state;
        let round = state.current_round;
        if !(state.phase.voting_enabled() && state.voting_phase) {
            return Err(ValidationError::VotingClosed.into());
        }
        if self.flags.vote_submitted(round) {
            return Err(ValidationError::VoteAlreadySubmitted.into());
        }
        if let VoteTarget::Player(target_id) = target {
            if !state
                .voting_applicants
                .iter()
                .any(|applicant| applicant.player_id == target_id)
            {
                return Err(ValidationError::UnknownVoteTarget(target_id).into());
            }
        }
        let outcome = self.dispatch(
            session,
            ClientCommand::SubmitVote {
                target_id: target.wire_id(),
            },
        );
        if outcome == CommandOutcome::Sent {
            self.flags.vote_submitted_round = Some(round);
        }
        self.refresh_view();
        Ok(outcome)
    }

    pub fn mark_ready_for_next_round(&mut self) -> Result<CommandOutcome, ClientError> {
        let session = self.playing_session()?;
        let round = session.state.current_round;
        let state = &session.state;
        if state.round_result.is_none() || state.voting_phase || !state.phase.subsidy_available()
        {
            return Err(ValidationError::NoResultToConfirm.into());
        }
        if self.flags.ready_confirmed(round) {
            return Err(ValidationError::ReadyAlreadyConfirmed.into());
        }
        let outcome = self.dispatch(session, ClientCommand::ReadyForNextRound);
        if outcome == CommandOutcome::Sent {
            self.flags.ready_round = Some(round);
        }
        self.refresh_view();
        Ok(outcome)
    }

    /// Local only: hides the intro card for the phase currently shown.
    pub fn dismiss_phase_intro(&mut self) -> ViewMode {
        if let ViewMode::PhaseIntro(phase) = self.view {
            self.flags.dismissed_intro = Some(phase);
            self.refresh_view();
        }
        self.view
    }

    /// Final standings with settlement fields, once the game has finished.
    pub async fn fetch_results(&self) -> Result<Vec<Player>, ClientError> {
        let session = self.active_session()?;
        if session.state.status != GameStatus::Finished {
            return Err(ValidationError::GameNotFinished.into());
        }
        let players = self.api.fetch_players(session.game.id).await?;
        Ok(dedup_players(players))
    }

    /// Releases the channel, stops polling and drops anything still queued.
    pub async fn leave_game(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.stop_polling();
            if let Some(channel) = session.channel.take() {
                self.connections.close(&channel).await;
            }
            info!(game_id = session.game.id.0, "session: left game");
        }
        self.flags.reset();
        self.refresh_view();
    }

    /// Waits for the next push or poll result and applies it. Returns `None`
    /// when there is no active game.
    ///
    /// Cancel-safe: the input is folded and the view refreshed before the
    /// channel release of a finished game, the only await after `recv`.
    pub async fn next_update(&mut self) -> Option<ViewMode> {
        let session = self.session.as_mut()?;
        let input = session.inbox.recv().await?;
        Some(self.apply_input(input).await)
    }

    /// Applies everything already queued without waiting.
    pub async fn drain_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Some(input) = self
            .session
            .as_mut()
            .and_then(|session| session.inbox.try_recv().ok())
        {
            self.apply_input(input).await;
            applied += 1;
        }
        applied
    }

    fn registered_user(&self) -> Result<UserSummary, ValidationError> {
        let user = self.user.as_ref().ok_or(ValidationError::NotRegistered)?;
        if user.username.trim().is_empty() {
            return Err(ValidationError::EmptyUsername);
        }
        Ok(user.clone())
    }

    fn active_session(&self) -> Result<&GameSession, ValidationError> {
        self.session.as_ref().ok_or(ValidationError::NoActiveGame)
    }

    fn playing_session(&self) -> Result<&GameSession, ValidationError> {
        let session = self.active_session()?;
        if !session.state.is_playing() {
            return Err(ValidationError::GameNotPlaying);
        }
        Ok(session)
    }

    async fn resolve_game(
        &self,
        identifier: &GameIdentifier,
        raw: &str,
    ) -> Result<GameSummary, ClientError> {
        match identifier {
            GameIdentifier::Id(game_id) => match self.api.fetch_game(*game_id).await {
                Err(err) if err.is_not_found() => {
                    debug!(
                        game_id = game_id.0,
                        "session: no game with that id, trying it as a room code"
                    );
                    self.api.fetch_game_by_code(raw.trim()).await
                }
                other => other,
            },
            GameIdentifier::Code(code) => self.api.fetch_game_by_code(code).await,
        }
    }

    async fn enter_game(
        &mut self,
        game: GameSummary,
        player_id: PlayerId,
        players: Vec<Player>,
    ) -> &GameSession {
        self.leave_game().await;

        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (state, _) = fold(
            SessionState::default(),
            SessionInput::Snapshot(Snapshot::from_pull(&game, players)),
        );

        let channel = if state.status == GameStatus::Finished {
            debug!(game_id = game.id.0, "session: game already finished, no channel");
            None
        } else {
            let key = ChannelKey::new(game.id, player_id);
            let push_tx = inbox_tx.clone();
            let on_event: EventCallback = Arc::new(move |event| {
                let _ = push_tx.send(SessionInput::Push(event));
            });
            match self.connections.open(key, on_event).await {
                Ok(handle) => Some(handle),
                Err(err) => {
                    warn!(
                        game_id = game.id.0,
                        player_id = player_id.0,
                        "session: continuing without game channel: {err}"
                    );
                    None
                }
            }
        };

        let poller = (state.status == GameStatus::Waiting).then(|| {
            spawn_roster_poller(
                Arc::clone(&self.api),
                game.id,
                self.lobby_poll_interval,
                inbox_tx.clone(),
            )
        });

        let session = self.session.insert(GameSession {
            game,
            player_id,
            state,
            channel,
            inbox,
            inbox_tx,
            poller,
        });
        self.view = select_view(Some(&session.state), &self.flags);
        session
    }

    fn dispatch(&self, session: &GameSession, command: ClientCommand) -> CommandOutcome {
        let Some(channel) = session.channel.as_ref() else {
            warn!(
                game_id = session.game.id.0,
                command = command.kind(),
                "session: no game channel, dropping command"
            );
            return CommandOutcome::Dropped;
        };
        match self.connections.send(channel, &command) {
            Ok(()) => CommandOutcome::Sent,
            Err(_) => CommandOutcome::Dropped,
        }
    }

    async fn apply_input(&mut self, input: SessionInput) -> ViewMode {
        let Some(session) = self.session.as_mut() else {
            return self.view;
        };
        let kind = input.kind();
        let game_id = session.game.id.0;

        let (next, disposition) = fold(std::mem::take(&mut session.state), input);
        session.state = next;
        match disposition {
            Disposition::Applied => debug!(game_id, kind, "session: applied {kind}"),
            Disposition::Ignored(reason) => {
                warn!(game_id, kind, "session: ignored {kind}: {reason}")
            }
        }

        if session.state.status != GameStatus::Waiting {
            session.stop_polling();
        }
        let released = if session.state.status == GameStatus::Finished {
            self.flags.reset();
            session.channel.take()
        } else {
            None
        };

        self.refresh_view();
        if let Some(channel) = released {
            info!(game_id, "session: game finished, releasing channel");
            self.connections.close(&channel).await;
        }
        self.view
    }

    fn refresh_view(&mut self) {
        let view = select_view(self.state(), &self.flags);
        if view != self.view {
            info!(from = ?self.view, to = ?view, "session: view changed");
            self.view = view;
        }
    }
}

fn spawn_roster_poller(
    api: Arc<dyn GameApi>,
    game_id: GameId,
    period: Duration,
    inbox: mpsc::UnboundedSender<SessionInput>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match api.fetch_players(game_id).await {
                Ok(players) => {
                    if inbox.send(SessionInput::RosterRefreshed(players)).is_err() {
                        break;
                    }
                }
                Err(err) => warn!(game_id = game_id.0, "session: roster poll failed: {err}"),
            }
        }
    })
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
