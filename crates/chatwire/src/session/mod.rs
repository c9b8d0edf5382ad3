//! Session management for chatwire.
//!
//! # Architecture
//!
//! ```text
//!  ┌─────────────────┐        ┌───────────────┐   TransportEvent   ┌────────────┐
//!  │ SessionRegistry │──owns──▶ SessionActor  ◀────── mpsc ────────│ Connection │
//!  │  (ID → Handle)  │        │  owns state,  │                    └────────────┘
//!  └───┬─────────▲───┘        │  connection,  │
//!      │ clone   │ lifecycle  │  metadata     │──▶ lifecycle / raw (broadcast)
//!      ▼         │ bridge     └───────▲───────┘
//!  ┌─────────────┴───┐                │ mpsc commands
//!  │  SessionHandle  │────────────────┘
//!  └─────────────────┘
//! ```
//!
//! - **SessionActor**: one tokio task per session. Handles commands and
//!   transport events serially and owns the connection.
//! - **SessionHandle**: cloneable sender plus subscriptions to the session's
//!   lifecycle and raw event channels and its state.
//! - **SessionRegistry**: maps ids to handles, republishes every lifecycle
//!   event on a global stream, and forgets sessions that logged out.

mod actor;
mod actor_types;
mod channel;
mod events;
mod handle;
mod reconnect;
mod registry;

pub use actor::SessionActor;
pub use actor_types::{
    ActorConfig, CHANNEL_CAPACITY, DEFAULT_EVENT_CAPACITY, SessionError, SessionSettings,
    SessionState,
};
pub use channel::EventChannel;
pub use events::{
    GlobalEvent, LifecycleEvent, META_CONNECTION_STATE, META_LINKED_ID, META_PLATFORM, Metadata,
    RawEvent,
};
pub use handle::SessionHandle;
pub use reconnect::ReconnectPolicy;
pub use registry::{RegistryError, SessionRegistry};
