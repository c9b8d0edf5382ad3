//! Session handle for communicating with a session actor.
//!
//! `SessionHandle` wraps the actor's command sender together with the
//! session's outbound channels. It is cheap to clone.

use chatwire_transport::SendResult;
use futures::Stream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use ulid::Ulid;

use super::actor_types::{SessionCommand, SessionError, SessionState};
use super::channel::EventChannel;
use super::events::{LifecycleEvent, Metadata, RawEvent};

/// Handle for interacting with a session actor.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    id: String,
    instance: Ulid,
    lifecycle: EventChannel<LifecycleEvent>,
    raw: EventChannel<RawEvent>,
    state_rx: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<SessionCommand>,
        id: String,
        instance: Ulid,
        lifecycle: EventChannel<LifecycleEvent>,
        raw: EventChannel<RawEvent>,
        state_rx: watch::Receiver<SessionState>,
    ) -> Self {
        Self {
            tx,
            id,
            instance,
            lifecycle,
            raw,
            state_rx,
        }
    }

    /// Get the session ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Unique id of this actor instance. A session id can be reused after a
    /// logout; the instance id cannot.
    pub fn instance(&self) -> Ulid {
        self.instance
    }

    // ------------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    pub fn has_connection(&self) -> bool {
        self.state().has_connection()
    }

    /// Snapshot of the session metadata.
    pub async fn metadata(&self) -> Result<Metadata, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::GetMetadata { reply: reply_tx })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;

        reply_rx.await.map_err(|_| SessionError::ActorShutdown)
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Subscribe to lifecycle events emitted from now on.
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    /// Subscribe to raw transport events emitted from now on.
    pub fn subscribe_raw(&self) -> broadcast::Receiver<RawEvent> {
        self.raw.subscribe()
    }

    /// Lifecycle events as a stream. Events lost to lag are skipped.
    pub fn lifecycle_stream(&self) -> impl Stream<Item = LifecycleEvent> + Send + 'static {
        BroadcastStream::new(self.subscribe_lifecycle()).filter_map(Result::ok)
    }

    /// Raw transport events as a stream. Events lost to lag are skipped.
    pub fn raw_stream(&self) -> impl Stream<Item = RawEvent> + Send + 'static {
        BroadcastStream::new(self.subscribe_raw()).filter_map(Result::ok)
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Connect the session. Returns once the connection is established.
    pub async fn start(&self) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Start { reply: reply_tx })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;

        reply_rx.await.map_err(|_| SessionError::ActorShutdown)?
    }

    /// Log out and end the session. A no-op when there is nothing to stop.
    pub async fn stop(&self) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Stop { reply: reply_tx })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;

        reply_rx.await.map_err(|_| SessionError::ActorShutdown)?
    }

    /// Send a text message over the session's connection.
    ///
    /// Returns the transport's raw result; `None` means the transport
    /// produced no message.
    pub async fn send_message(
        &self,
        to: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Option<SendResult>, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::SendMessage {
                to: to.into(),
                content: content.into(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;

        reply_rx.await.map_err(|_| SessionError::ActorShutdown)?
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("instance", &self.instance)
            .field("state", &self.state())
            .finish()
    }
}
