use super::*;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use serde_json::json;
use shared::domain::{Choice, Phase};
use tokio::{net::TcpListener, sync::mpsc, time::timeout};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct WsServerState {
    greeting: Arc<Vec<String>>,
    received: mpsc::UnboundedSender<(i64, String)>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path((_game_id, player_id)): Path<(i64, i64)>,
    State(state): State<WsServerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, player_id, state))
}

/// Sends the greeting frames, then answers each command with a
/// `submission_status` naming the sender.
async fn serve_socket(mut socket: WebSocket, player_id: i64, state: WsServerState) {
    for frame in state.greeting.iter() {
        if socket.send(WsMessage::Text(frame.clone())).await.is_err() {
            return;
        }
    }
    while let Some(Ok(message)) = socket.recv().await {
        if let WsMessage::Text(text) = message {
            let _ = state.received.send((player_id, text));
            let reply = json!({"type": "submission_status", "submitted_player_ids": [player_id]});
            if socket
                .send(WsMessage::Text(reply.to_string()))
                .await
                .is_err()
            {
                return;
            }
        }
    }
}

async fn spawn_ws_server(
    greeting: Vec<String>,
) -> (String, mpsc::UnboundedReceiver<(i64, String)>) {
    let (received_tx, received_rx) = mpsc::unbounded_channel();
    let state = WsServerState {
        greeting: Arc::new(greeting),
        received: received_tx,
    };
    let app = Router::new()
        .route("/ws/game/:game_id/player/:player_id", get(ws_handler))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("ws://{addr}"), received_rx)
}

fn collecting_callback() -> (EventCallback, mpsc::UnboundedReceiver<InboundEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: EventCallback = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    (callback, rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<InboundEvent>) -> InboundEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("event within timeout")
        .expect("callback channel open")
}

fn key(game_id: i64, player_id: i64) -> ChannelKey {
    ChannelKey::new(GameId(game_id), PlayerId(player_id))
}

#[test]
fn decode_frame_reads_type_and_optional_seq() {
    let inbound = decode_frame(r#"{"type":"game_started","current_round":1,"phase":1,"seq":4}"#)
        .expect("valid frame");
    assert_eq!(inbound.seq, Some(4));
    assert_eq!(
        inbound.event,
        ServerEvent::GameStarted {
            current_round: 1,
            phase: Phase::One,
            message: None,
        }
    );

    let without_seq = decode_frame(r#"{"type":"game_finished"}"#).expect("valid frame");
    assert_eq!(without_seq.seq, None);
}

#[test]
fn decode_frame_rejects_bad_frames() {
    assert!(matches!(
        decode_frame("not json"),
        Err(FrameError::Malformed(_))
    ));
    assert!(matches!(
        decode_frame(r#"{"current_round":1}"#),
        Err(FrameError::MissingType)
    ));
    assert!(matches!(
        decode_frame(r#"["game_started"]"#),
        Err(FrameError::MissingType)
    ));
    assert!(matches!(
        decode_frame(r#"{"type":"chat_message","text":"hi"}"#),
        Err(FrameError::UnrecognizedType(kind)) if kind == "chat_message"
    ));
    assert!(matches!(
        decode_frame(r#"{"type":"next_round","current_round":"six","phase":2}"#),
        Err(FrameError::InvalidPayload { kind, .. }) if kind == "next_round"
    ));
    assert!(matches!(
        decode_frame(r#"{"type":"next_round","current_round":6,"phase":4}"#),
        Err(FrameError::InvalidPayload { .. })
    ));
}

#[test]
fn channel_url_follows_game_and_player() {
    let manager = ConnectionManager::new("ws://localhost:8000/");
    assert_eq!(
        manager.channel_url(key(3, 9)),
        "ws://localhost:8000/ws/game/3/player/9"
    );
}

#[tokio::test]
async fn delivers_valid_frames_in_order_and_drops_invalid_ones() {
    let (ws_base, _received) = spawn_ws_server(vec![
        json!({"type": "game_started", "current_round": 1, "phase": 1}).to_string(),
        "{broken".to_string(),
        json!({"type": "mystery"}).to_string(),
        json!({"type": "round_result", "phase": 1}).to_string(),
        json!({"type": "next_round", "current_round": 2, "phase": 1}).to_string(),
    ])
    .await;
    let manager = ConnectionManager::new(ws_base);
    let (callback, mut events) = collecting_callback();

    let handle = manager.open(key(1, 1), callback).await.expect("open");
    assert!(handle.is_open());

    let first = next_event(&mut events).await;
    assert_eq!(first.event.kind(), "game_started");
    let second = next_event(&mut events).await;
    assert_eq!(second.event.kind(), "next_round");
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn send_reaches_server_as_tagged_json() {
    let (ws_base, mut received) = spawn_ws_server(Vec::new()).await;
    let manager = ConnectionManager::new(ws_base);
    let (callback, mut events) = collecting_callback();
    let handle = manager.open(key(5, 2), callback).await.expect("open");

    manager
        .send(
            &handle,
            &ClientCommand::SubmitChoice {
                choice: Choice::Organic,
                apply_subsidy: false,
            },
        )
        .expect("send");

    let (player_id, text) = timeout(WAIT, received.recv())
        .await
        .expect("server receives")
        .expect("server channel");
    assert_eq!(player_id, 2);
    let value: Value = serde_json::from_str(&text).expect("json");
    assert_eq!(
        value,
        json!({"type": "submit_choice", "choice": "organic", "apply_subsidy": false})
    );

    let echoed = next_event(&mut events).await;
    assert_eq!(
        echoed.event,
        ServerEvent::SubmissionStatus {
            submitted_player_ids: vec![PlayerId(2)],
        }
    );
}

#[tokio::test]
async fn send_after_close_is_dropped() {
    let (ws_base, mut received) = spawn_ws_server(Vec::new()).await;
    let manager = ConnectionManager::new(ws_base);
    let (callback, _events) = collecting_callback();
    let handle = manager.open(key(1, 1), callback).await.expect("open");

    manager.close(&handle).await;
    assert!(!handle.is_open());
    assert_eq!(manager.active_key().await, None);

    let result = manager.send(&handle, &ClientCommand::ReadyForNextRound);
    assert_eq!(result, Err(SendError::NotOpen));
    assert!(timeout(Duration::from_millis(200), received.recv())
        .await
        .map(|message| message.is_none())
        .unwrap_or(true));
}

#[tokio::test]
async fn reopening_same_key_reuses_channel_and_replaces_callback() {
    let (ws_base, _received) = spawn_ws_server(Vec::new()).await;
    let manager = ConnectionManager::new(ws_base);
    let (first_callback, mut first_events) = collecting_callback();
    let (second_callback, mut second_events) = collecting_callback();

    let first = manager.open(key(1, 1), first_callback).await.expect("open");
    let second = manager
        .open(key(1, 1), second_callback)
        .await
        .expect("reopen");
    assert!(first.same_channel(&second));

    manager
        .send(&second, &ClientCommand::ReadyForNextRound)
        .expect("send");
    let event = next_event(&mut second_events).await;
    assert_eq!(event.event.kind(), "submission_status");
    assert!(first_events.try_recv().is_err());
}

#[tokio::test]
async fn opening_a_different_key_tears_down_the_previous_channel() {
    let (ws_base, mut received) = spawn_ws_server(Vec::new()).await;
    let manager = ConnectionManager::new(ws_base);
    let (old_callback, mut old_events) = collecting_callback();
    let (new_callback, mut new_events) = collecting_callback();

    let old = manager.open(key(1, 1), old_callback).await.expect("open");
    let new = manager.open(key(2, 7), new_callback).await.expect("open");

    assert!(!old.is_open());
    assert!(new.is_open());
    assert_eq!(manager.active_key().await, Some(key(2, 7)));
    assert_eq!(
        manager.send(&old, &ClientCommand::ReadyForNextRound),
        Err(SendError::NotOpen)
    );

    manager
        .send(&new, &ClientCommand::SubmitVote { target_id: 0 })
        .expect("send");
    let (player_id, _) = timeout(WAIT, received.recv())
        .await
        .expect("server receives")
        .expect("server channel");
    assert_eq!(player_id, 7);
    next_event(&mut new_events).await;
    assert!(old_events.try_recv().is_err());
}

#[tokio::test]
async fn connect_failure_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let manager = ConnectionManager::new(format!("ws://{addr}"));
    let (callback, _events) = collecting_callback();
    let err = manager
        .open(key(1, 1), callback)
        .await
        .expect_err("nothing listening");
    assert!(matches!(err, ConnectionError::Connect { .. }));
    assert_eq!(manager.active_key().await, None);
}
