pub mod api;
pub mod config;
pub mod connection;
pub mod error;
pub mod reducer;
pub mod session;
pub mod view;

pub use api::{GameApi, HttpGameApi};
pub use config::{load_settings, ClientSettings};
pub use connection::{ChannelKey, ConnectionHandle, ConnectionManager, EventCallback, InboundEvent};
pub use error::{ClientError, ConnectionError, FrameError, SendError, ValidationError};
pub use reducer::{reduce, SessionInput, SessionState, Snapshot};
pub use session::{CommandOutcome, GameIdentifier, GameSession, SessionController};
pub use view::{select_view, LocalFlags, ViewMode};
