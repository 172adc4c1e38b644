use super::*;
use proptest::prelude::*;
use shared::{
    domain::UserId,
    protocol::{EnvChange, SubsidyApplied, SubsidyCaught, VoteResult},
};

fn player(id: i64, user_id: Option<i64>, username: &str) -> Player {
    Player {
        id: PlayerId(id),
        user_id: user_id.map(UserId),
        username: username.to_string(),
        current_nt: 10.0,
        current_env: 100.0,
        nt_before_settlement: None,
        final_env: None,
        env_settlement: None,
        final_nt: None,
        is_winner: None,
    }
}

fn push(event: ServerEvent) -> SessionInput {
    SessionInput::Push(InboundEvent::new(event))
}

fn playing(round: u32, phase: Phase) -> SessionState {
    SessionState {
        players: vec![player(1, Some(10), "ada"), player(2, Some(20), "bo")],
        status: GameStatus::Playing,
        current_round: round,
        phase,
        ..SessionState::default()
    }
}

fn round_result(round: u32, phase: Phase) -> RoundResult {
    RoundResult {
        phase,
        round_number: round,
        nt_before: None,
        nt_after: 13.0,
        env_before: None,
        env_after: Some(0.5),
        env_change: Some(EnvChange::Amount(0.5)),
        round_nt_earned: 3.0,
        subsidy_result: None,
        phase3_broadcasts: Vec::new(),
    }
}

fn next_round(round: u32, phase: Phase) -> ServerEvent {
    ServerEvent::NextRound {
        current_round: round,
        phase,
        players: None,
        submitted_player_ids: None,
        message: None,
    }
}

fn applied(state: SessionState, input: SessionInput) -> SessionState {
    let (next, disposition) = fold(state, input);
    assert_eq!(disposition, Disposition::Applied);
    next
}

#[test]
fn game_started_moves_waiting_session_into_play() {
    let state = SessionState {
        players: vec![player(1, Some(10), "ada")],
        ..SessionState::default()
    };
    let next = applied(
        state,
        push(ServerEvent::GameStarted {
            current_round: 1,
            phase: Phase::One,
            message: Some("游戏开始".to_string()),
        }),
    );
    assert_eq!(next.status, GameStatus::Playing);
    assert_eq!(next.current_round, 1);
    assert_eq!(next.phase, Phase::One);
    assert_eq!(next.players.len(), 1);
    assert_eq!(next.last_notice.as_deref(), Some("游戏开始"));
}

#[test]
fn round_result_sets_result_and_closes_voting() {
    let state = SessionState {
        voting_phase: true,
        ..playing(12, Phase::Three)
    };
    let next = applied(state, push(ServerEvent::RoundResult(round_result(12, Phase::Three))));
    assert_eq!(next.round_result, Some(round_result(12, Phase::Three)));
    assert!(!next.voting_phase);
}

#[test]
fn next_round_clears_exactly_round_scoped_fields() {
    let before = SessionState {
        round_result: Some(round_result(7, Phase::Two)),
        broadcast: Some(Broadcast::SubsidyApplied(SubsidyApplied {
            message: "补贴已发放".to_string(),
            applicants: Vec::new(),
            next_step: None,
        })),
        phase2_broadcasts: Some(Phase2Broadcasts::default()),
        voting_phase: true,
        voting_applicants: vec![Applicant {
            player_id: PlayerId(2),
            username: "bo".to_string(),
        }],
        submitted_player_ids: vec![PlayerId(1)],
        last_notice: Some("earlier".to_string()),
        ..playing(7, Phase::Two)
    };

    let after = applied(before.clone(), push(next_round(8, Phase::Two)));

    let expected = SessionState {
        current_round: 8,
        round_result: None,
        broadcast: None,
        phase2_broadcasts: None,
        voting_phase: false,
        ..before.clone()
    };
    assert_eq!(after, expected);
    assert_eq!(after.players, before.players);
}

#[test]
fn next_round_with_players_replaces_and_dedups_roster() {
    let state = playing(3, Phase::One);
    let next = applied(
        state,
        push(ServerEvent::NextRound {
            current_round: 4,
            phase: Phase::One,
            players: Some(vec![
                player(5, Some(10), "ada"),
                player(6, Some(10), "ada-again"),
                player(7, None, "guest"),
            ]),
            submitted_player_ids: Some(Vec::new()),
            message: None,
        }),
    );
    let ids: Vec<_> = next.players.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![PlayerId(5), PlayerId(7)]);
}

#[test]
fn partial_merges_preserve_roster_status_and_round() {
    let before = SessionState {
        round_result: Some(round_result(8, Phase::Two)),
        ..playing(8, Phase::Two)
    };
    let after_phase2 = applied(
        before.clone(),
        push(ServerEvent::Phase2Broadcasts(Phase2Broadcasts {
            applicants: vec![Applicant {
                player_id: PlayerId(1),
                username: "ada".to_string(),
            }],
            caught_players: Vec::new(),
        })),
    );
    let after = applied(
        after_phase2,
        push(ServerEvent::SubsidyApplied(SubsidyApplied {
            message: "1 人申请了补贴".to_string(),
            applicants: Vec::new(),
            next_step: None,
        })),
    );

    assert_eq!(after.players, before.players);
    assert_eq!(after.status, before.status);
    assert_eq!(after.current_round, before.current_round);
    assert_eq!(after.round_result, before.round_result);
    assert!(after.phase2_broadcasts.is_some());
    assert_eq!(
        after.broadcast.as_ref().map(Broadcast::message),
        Some("1 人申请了补贴")
    );
}

#[test]
fn broadcasts_are_last_write_wins() {
    let state = playing(12, Phase::Three);
    let state = applied(
        state,
        push(ServerEvent::SubsidyCaught(SubsidyCaught {
            message: "caught".to_string(),
            caught_players: Vec::new(),
        })),
    );
    let state = applied(
        state,
        push(ServerEvent::VoteResult(VoteResult {
            message: "vote".to_string(),
            caught: false,
            target_id: None,
        })),
    );
    assert!(matches!(state.broadcast, Some(Broadcast::VoteResult(_))));
}

#[test]
fn voting_start_opens_voting_with_applicants() {
    let state = playing(11, Phase::Three);
    let next = applied(
        state,
        push(ServerEvent::VotingStart {
            applicants: Vec::new(),
            vote_submitted_player_ids: Some(Vec::new()),
            message: None,
        }),
    );
    assert!(next.voting_phase);
    assert!(next.voting_applicants.is_empty());
}

#[test]
fn game_finished_is_terminal() {
    let state = applied(
        playing(15, Phase::Three),
        push(ServerEvent::GameFinished {
            message: None,
            excel_path: None,
        }),
    );
    assert_eq!(state.status, GameStatus::Finished);

    let (after, disposition) = fold(state.clone(), push(next_round(16, Phase::Three)));
    assert_eq!(disposition, Disposition::Ignored(IgnoreReason::GameOver));
    assert_eq!(after, state);
}

#[test]
fn snapshot_replaces_authoritative_fields_wholesale() {
    let before = SessionState {
        broadcast: Some(Broadcast::VoteResult(VoteResult {
            message: "kept".to_string(),
            caught: true,
            target_id: Some(PlayerId(2)),
        })),
        ..playing(9, Phase::Two)
    };
    let after = applied(
        before.clone(),
        SessionInput::Snapshot(Snapshot {
            players: vec![player(3, None, "cy"), player(3, None, "cy")],
            status: GameStatus::Playing,
            current_round: 10,
            phase: Phase::Two,
        }),
    );
    assert_eq!(after.players.len(), 1);
    assert_eq!(after.current_round, 10);
    assert_eq!(after.broadcast, before.broadcast);
}

#[test]
fn roster_refresh_only_touches_players() {
    let before = SessionState::default();
    let after = applied(
        before.clone(),
        SessionInput::RosterRefreshed(vec![player(1, Some(10), "ada"), player(2, Some(10), "ada")]),
    );
    assert_eq!(after.players.len(), 1);
    assert_eq!(SessionState { players: Vec::new(), ..after }, before);
}

#[test]
fn round_scoped_push_before_game_starts_is_ignored() {
    let waiting = SessionState {
        players: vec![player(1, Some(10), "ada")],
        ..SessionState::default()
    };
    let (after, disposition) = fold(
        waiting.clone(),
        push(ServerEvent::VotingStart {
            applicants: Vec::new(),
            vote_submitted_player_ids: None,
            message: None,
        }),
    );
    assert_eq!(
        disposition,
        Disposition::Ignored(IgnoreReason::NotPlaying(GameStatus::Waiting))
    );
    assert_eq!(after, waiting);
    assert!(!after.voting_phase);
}

#[test]
fn join_race_snapshot_then_redelivered_push_stays_waiting() {
    let snapshot = SessionInput::Snapshot(Snapshot {
        players: vec![player(1, Some(10), "ada")],
        status: GameStatus::Waiting,
        current_round: 0,
        phase: Phase::One,
    });
    let state = reduce(SessionState::default(), snapshot);
    let state = reduce(
        state,
        push(ServerEvent::VotingStart {
            applicants: Vec::new(),
            vote_submitted_player_ids: None,
            message: None,
        }),
    );
    assert_eq!(state.status, GameStatus::Waiting);
    assert!(!state.voting_phase);
    assert_eq!(state.players.len(), 1);
}

#[test]
fn stale_round_result_is_discarded() {
    let state = playing(4, Phase::One);
    let (after, disposition) = fold(
        state.clone(),
        push(ServerEvent::RoundResult(round_result(3, Phase::One))),
    );
    assert_eq!(
        disposition,
        Disposition::Ignored(IgnoreReason::StaleRound {
            event_round: 3,
            current_round: 4,
        })
    );
    assert_eq!(after, state);
}

#[test]
fn backwards_round_transition_is_discarded() {
    let state = playing(9, Phase::Two);
    let (after, disposition) = fold(state.clone(), push(next_round(8, Phase::Two)));
    assert!(matches!(
        disposition,
        Disposition::Ignored(IgnoreReason::Regression { round: 8, .. })
    ));
    assert_eq!(after, state);

    let (_, disposition) = fold(
        state,
        push(ServerEvent::GameStarted {
            current_round: 1,
            phase: Phase::One,
            message: None,
        }),
    );
    assert!(matches!(
        disposition,
        Disposition::Ignored(IgnoreReason::Regression { .. })
    ));
}

#[test]
fn sequence_numbers_must_increase_but_may_skip() {
    let state = playing(2, Phase::One);
    let state = applied(
        state,
        SessionInput::Push(InboundEvent::with_seq(
            5,
            ServerEvent::SubmissionStatus {
                submitted_player_ids: vec![PlayerId(1)],
            },
        )),
    );
    assert_eq!(state.last_seq, Some(5));

    let (after, disposition) = fold(
        state.clone(),
        SessionInput::Push(InboundEvent::with_seq(
            5,
            ServerEvent::RoundResult(round_result(2, Phase::One)),
        )),
    );
    assert_eq!(
        disposition,
        Disposition::Ignored(IgnoreReason::OutOfSequence { seq: 5, last: 5 })
    );
    assert_eq!(after, state);

    let after = applied(
        state,
        SessionInput::Push(InboundEvent::with_seq(
            9,
            ServerEvent::RoundResult(round_result(2, Phase::One)),
        )),
    );
    assert_eq!(after.last_seq, Some(9));
    assert!(after.round_result.is_some());

    let unsequenced = applied(
        after,
        push(ServerEvent::SubmissionStatus {
            submitted_player_ids: Vec::new(),
        }),
    );
    assert_eq!(unsequenced.last_seq, Some(9));
}

#[test]
fn submission_progress_is_replaced_by_status_pushes() {
    let state = applied(
        playing(2, Phase::One),
        push(ServerEvent::SubmissionStatus {
            submitted_player_ids: vec![PlayerId(2)],
        }),
    );
    assert_eq!(state.submitted_player_ids, vec![PlayerId(2)]);

    let state = applied(
        state,
        push(ServerEvent::NextRound {
            current_round: 3,
            phase: Phase::One,
            players: None,
            submitted_player_ids: Some(Vec::new()),
            message: None,
        }),
    );
    assert!(state.submitted_player_ids.is_empty());
}

fn arb_players() -> impl Strategy<Value = Vec<Player>> {
    prop::collection::vec((0i64..6, prop::option::of(0i64..4)), 0..24).prop_map(|entries| {
        entries
            .into_iter()
            .enumerate()
            .map(|(index, (id, user_id))| player(id, user_id, &format!("p{index}")))
            .collect()
    })
}

proptest! {
    #[test]
    fn dedup_keeps_one_entry_per_identity_in_first_seen_order(players in arb_players()) {
        let deduped = dedup_players(players.clone());

        let mut expected_order = Vec::new();
        for candidate in &players {
            if !expected_order.contains(&candidate.identity()) {
                expected_order.push(candidate.identity());
            }
        }
        let actual_order: Vec<_> = deduped.iter().map(Player::identity).collect();
        prop_assert_eq!(&actual_order, &expected_order);

        for kept in &deduped {
            let first = players
                .iter()
                .find(|candidate| candidate.identity() == kept.identity())
                .expect("kept entry came from input");
            prop_assert_eq!(kept, first);
        }
    }

    #[test]
    fn broadcast_pushes_never_touch_roster_or_round(round in 6u32..=10, message in "[a-z]{0,12}") {
        let before = playing(round, Phase::Two);
        let after = reduce(
            before.clone(),
            push(ServerEvent::SubsidyApplied(SubsidyApplied {
                message,
                applicants: Vec::new(),
                next_step: None,
            })),
        );
        prop_assert_eq!(&after.players, &before.players);
        prop_assert_eq!(after.status, before.status);
        prop_assert_eq!(after.current_round, before.current_round);
    }
}
