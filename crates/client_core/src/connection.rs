use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use shared::{
    domain::{GameId, PlayerId},
    protocol::{ClientCommand, ServerEvent},
};
use tokio::{
    sync::{mpsc, Mutex, RwLock},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::{ConnectionError, FrameError, SendError};

/// Identifies the single live game channel: one per (game, player).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub game_id: GameId,
    pub player_id: PlayerId,
}

impl ChannelKey {
    pub fn new(game_id: GameId, player_id: PlayerId) -> Self {
        Self { game_id, player_id }
    }
}

/// A decoded push event plus its optional server sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub seq: Option<u64>,
    pub event: ServerEvent,
}

impl InboundEvent {
    pub fn new(event: ServerEvent) -> Self {
        Self { seq: None, event }
    }

    pub fn with_seq(seq: u64, event: ServerEvent) -> Self {
        Self {
            seq: Some(seq),
            event,
        }
    }
}

pub type EventCallback = Arc<dyn Fn(InboundEvent) + Send + Sync>;

/// Validates an inbound text frame. Unknown discriminators and payloads that
/// do not match their declared type are rejected, never partially applied.
pub fn decode_frame(text: &str) -> Result<InboundEvent, FrameError> {
    let value: Value = serde_json::from_str(text).map_err(FrameError::Malformed)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingType)?
        .to_string();
    if !ServerEvent::is_recognized_kind(&kind) {
        return Err(FrameError::UnrecognizedType(kind));
    }
    let seq = value.get("seq").and_then(Value::as_u64);
    let event = serde_json::from_value::<ServerEvent>(value)
        .map_err(|source| FrameError::InvalidPayload { kind, source })?;
    Ok(InboundEvent { seq, event })
}

struct ChannelShared {
    key: ChannelKey,
    open: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<Message>,
    callback: RwLock<Option<EventCallback>>,
}

/// Cheap handle to the live channel. Becomes inert once the channel closes.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<ChannelShared>,
}

impl ConnectionHandle {
    pub fn key(&self) -> ChannelKey {
        self.shared.key
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    fn same_channel(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("key", &self.shared.key)
            .field("open", &self.is_open())
            .finish()
    }
}

struct ActiveChannel {
    handle: ConnectionHandle,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl ActiveChannel {
    async fn shutdown(self) {
        let shared = &self.handle.shared;
        shared.open.store(false, Ordering::SeqCst);
        *shared.callback.write().await = None;
        self.reader_task.abort();
        // The writer exits after flushing the close frame, or immediately if
        // the socket is already gone.
        if shared.outbound.send(Message::Close(None)).is_err() {
            self.writer_task.abort();
        }
    }
}

/// Owns at most one live game channel for the process.
pub struct ConnectionManager {
    ws_base_url: String,
    active: Mutex<Option<ActiveChannel>>,
}

impl ConnectionManager {
    pub fn new(ws_base_url: impl Into<String>) -> Self {
        Self {
            ws_base_url: ws_base_url.into().trim_end_matches('/').to_string(),
            active: Mutex::new(None),
        }
    }

    pub fn channel_url(&self, key: ChannelKey) -> String {
        format!(
            "{}/ws/game/{}/player/{}",
            self.ws_base_url, key.game_id, key.player_id
        )
    }

    /// Opens the channel for `key`. Reopening the key that is already open
    /// reuses it and swaps the callback; any other live channel is torn down
    /// first so no two channels ever coexist.
    pub async fn open(
        &self,
        key: ChannelKey,
        on_event: EventCallback,
    ) -> Result<ConnectionHandle, ConnectionError> {
        let mut active = self.active.lock().await;

        if let Some(current) = active.as_ref() {
            if current.handle.key() == key && current.handle.is_open() {
                *current.handle.shared.callback.write().await = Some(on_event);
                debug!(
                    game_id = key.game_id.0,
                    player_id = key.player_id.0,
                    "ws: reusing open channel with new callback"
                );
                return Ok(current.handle.clone());
            }
        }

        if let Some(previous) = active.take() {
            let previous_key = previous.handle.key();
            info!(
                game_id = previous_key.game_id.0,
                player_id = previous_key.player_id.0,
                "ws: closing previous channel before opening a new one"
            );
            previous.shutdown().await;
        }

        let url = self.channel_url(key);
        let (ws_stream, _) = connect_async(url.as_str()).await.map_err(|source| {
            warn!(
                game_id = key.game_id.0,
                player_id = key.player_id.0,
                "ws: connect failed: {source}"
            );
            ConnectionError::Connect {
                url: url.clone(),
                source,
            }
        })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let open = Arc::new(AtomicBool::new(true));
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let shared = Arc::new(ChannelShared {
            key,
            open: Arc::clone(&open),
            outbound: outbound_tx,
            callback: RwLock::new(Some(on_event)),
        });

        let writer_open = Arc::clone(&open);
        let writer_task = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(err) = ws_writer.send(message).await {
                    warn!(
                        game_id = key.game_id.0,
                        player_id = key.player_id.0,
                        "ws: send failed: {err}"
                    );
                    writer_open.store(false, Ordering::SeqCst);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader_shared = Arc::clone(&shared);
        let reader_task = tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match decode_frame(&text) {
                        Ok(inbound) => {
                            let callback = reader_shared.callback.read().await.clone();
                            if let Some(callback) = callback {
                                callback(inbound);
                            }
                        }
                        Err(err) => warn!(
                            game_id = key.game_id.0,
                            player_id = key.player_id.0,
                            "ws: dropping inbound frame: {err}"
                        ),
                    },
                    Ok(Message::Close(_)) => {
                        info!(
                            game_id = key.game_id.0,
                            player_id = key.player_id.0,
                            "ws: channel closed by server"
                        );
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(
                            game_id = key.game_id.0,
                            player_id = key.player_id.0,
                            "ws: receive failed: {err}"
                        );
                        break;
                    }
                }
            }
            reader_shared.open.store(false, Ordering::SeqCst);
        });

        info!(
            game_id = key.game_id.0,
            player_id = key.player_id.0,
            "ws: channel open"
        );
        let handle = ConnectionHandle { shared };
        *active = Some(ActiveChannel {
            handle: handle.clone(),
            reader_task,
            writer_task,
        });
        Ok(handle)
    }

    /// Fire-and-forget. Nothing is queued or retried when the channel is not
    /// open; the command is dropped and the caller told so.
    pub fn send(
        &self,
        handle: &ConnectionHandle,
        command: &ClientCommand,
    ) -> Result<(), SendError> {
        let key = handle.key();
        if !handle.is_open() {
            warn!(
                game_id = key.game_id.0,
                player_id = key.player_id.0,
                command = command.kind(),
                "ws: dropping command, channel not open"
            );
            return Err(SendError::NotOpen);
        }
        let text = serde_json::to_string(command).map_err(|err| {
            warn!(command = command.kind(), "ws: failed to encode command: {err}");
            SendError::Encode
        })?;
        if handle.shared.outbound.send(Message::Text(text)).is_err() {
            handle.shared.open.store(false, Ordering::SeqCst);
            warn!(
                game_id = key.game_id.0,
                player_id = key.player_id.0,
                command = command.kind(),
                "ws: dropping command, writer stopped"
            );
            return Err(SendError::NotOpen);
        }
        debug!(
            game_id = key.game_id.0,
            player_id = key.player_id.0,
            command = command.kind(),
            "ws: command sent"
        );
        Ok(())
    }

    /// Closes the channel behind `handle`. No callback fires afterwards.
    pub async fn close(&self, handle: &ConnectionHandle) {
        let mut active = self.active.lock().await;
        let is_current = active
            .as_ref()
            .is_some_and(|current| current.handle.same_channel(handle));
        if is_current {
            if let Some(current) = active.take() {
                let key = current.handle.key();
                current.shutdown().await;
                info!(
                    game_id = key.game_id.0,
                    player_id = key.player_id.0,
                    "ws: channel closed"
                );
            }
        } else {
            handle.shared.open.store(false, Ordering::SeqCst);
        }
    }

    pub async fn active_key(&self) -> Option<ChannelKey> {
        self.active
            .lock()
            .await
            .as_ref()
            .filter(|current| current.handle.is_open())
            .map(|current| current.handle.key())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(current) = self.active.get_mut().take() {
            current.handle.shared.open.store(false, Ordering::SeqCst);
            current.reader_task.abort();
            current.writer_task.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
