//! # skein-collab — Multiplayer story editing over pub/sub
//!
//! Relays story edits between sessions through a central broker. Each
//! session keeps a local [`skein_core::StoryStore`] replica; one session
//! at a time holds a lease-based write lock on a story while the others
//! are driven read-only from the broadcast stream.
//!
//! ```text
//! ┌──────────────┐   wire actions    ┌──────────────┐
//! │ StoryEditor  │ ◄───────────────► │   broker     │
//! │ (per client) │  story:{name}     │ (pub/sub)    │
//! └──────┬───────┘                   └──────┬───────┘
//!        │ gated by LockSession             │ fan-out
//!        ▼                                  ▼
//! ┌──────────────┐                   other replicas
//! │ StoryStore   │                   (applied unconditionally)
//! └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — wire action sum types and the JSON envelope codec
//! - [`transport`] — [`Channel`](transport::Channel) trait + in-memory broker
//! - [`ws`] — WebSocket channel implementation
//! - [`lock`] — lock/session state machine and lock-service client
//! - [`editor`] — the action layer tying store, codec, and channel together

pub mod editor;
pub mod lock;
pub mod protocol;
pub mod transport;
pub mod ws;

pub use editor::{EditorEvent, StoryEditor};
pub use lock::{
    HttpLockService, LockService, LockServiceError, LockSession, LockState, StoryListing,
    KEEPALIVE_INTERVAL,
};
pub use protocol::{
    FieldAction, LobbyEvent, ProtocolError, StoryAction, WireAction, WireEnvelope,
};
pub use transport::{Broker, BrokerChannel, Channel, TransportError, LOBBY_TOPIC};
pub use ws::WsChannel;
