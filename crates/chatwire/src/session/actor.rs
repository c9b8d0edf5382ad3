//! Per-session actor.
//!
//! Each session gets a dedicated task that owns its connection and state.
//! Commands from handles and events from the transport are delivered into the
//! same loop and handled one at a time, so no locks are held across await
//! points and a session never observes its own events out of order.
//!
//! Teardown is two-phase: `logged_out` is emitted while the triggering event
//! is still being handled, and the actual cleanup is queued and runs right
//! after that handler returns.

use std::collections::VecDeque;
use std::sync::Arc;

use chatwire_transport::{
    Connection, ConnectionFactory, ConnectionUpdate, Credentials, DisconnectReason,
    MessageStatusUpdate, SendResult, TransportEvent,
};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::store::CredentialStore;

use super::actor_types::{
    ActorConfig, CHANNEL_CAPACITY, SessionCommand, SessionError, SessionSettings, SessionState,
};
use super::channel::EventChannel;
use super::events::{
    LifecycleEvent, META_CONNECTION_STATE, META_LINKED_ID, META_PLATFORM, Metadata, RawEvent,
};
use super::handle::SessionHandle;

/// Work queued to run after the current event handler.
enum Deferred {
    Cleanup { erase_credentials: bool },
}

// ============================================================================
// Session Actor
// ============================================================================

/// Per-session actor that owns the connection and session state.
pub struct SessionActor {
    // Identity
    id: String,

    // State
    state: SessionState,
    metadata: Metadata,
    /// Set once `logged_out` has been emitted.
    closing: bool,

    // Transport
    credentials: Arc<dyn CredentialStore>,
    factory: Arc<dyn ConnectionFactory>,
    settings: SessionSettings,
    connection: Option<Arc<dyn Connection>>,
    transport_rx: Option<mpsc::Receiver<TransportEvent>>,

    // Reconnect
    reconnect_attempts: u32,
    reconnect_at: Option<Instant>,

    deferred: VecDeque<Deferred>,

    // Outbound
    lifecycle: EventChannel<LifecycleEvent>,
    raw: EventChannel<RawEvent>,
    state_tx: watch::Sender<SessionState>,

    // Inbound
    command_rx: mpsc::Receiver<SessionCommand>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SessionActor {
    /// Spawn a new session actor in the `Created` state.
    ///
    /// Returns a handle to it and the JoinHandle of the actor task.
    pub fn spawn(
        config: ActorConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (SessionHandle, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionState::Created);
        let lifecycle = EventChannel::new(config.settings.event_capacity);
        let raw = EventChannel::new(config.settings.event_capacity);

        let handle = SessionHandle::new(
            tx,
            config.id.clone(),
            Ulid::new(),
            lifecycle.clone(),
            raw.clone(),
            state_rx,
        );

        let actor = Self {
            id: config.id,
            state: SessionState::Created,
            metadata: Metadata::new(),
            closing: false,
            credentials: config.credentials,
            factory: config.factory,
            settings: config.settings,
            connection: None,
            transport_rx: None,
            reconnect_attempts: 0,
            reconnect_at: None,
            deferred: VecDeque::new(),
            lifecycle,
            raw,
            state_tx,
            command_rx: rx,
            shutdown_rx,
        };

        let task = tokio::spawn(actor.run());
        (handle, task)
    }

    /// Main actor loop.
    async fn run(mut self) {
        debug!(session_id = %self.id, "Session actor started");

        if *self.shutdown_rx.borrow_and_update() {
            self.detach().await;
            return;
        }

        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    // A dropped sender means the registry is gone.
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        debug!(session_id = %self.id, "Session actor received shutdown signal");
                        self.detach().await;
                        break;
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            debug!(session_id = %self.id, "All handles dropped, shutting down");
                            self.detach().await;
                            break;
                        }
                    }
                }

                event = next_event(&mut self.transport_rx) => {
                    self.handle_transport_event(event).await;
                }

                _ = tokio::time::sleep_until(self.reconnect_at.unwrap_or_else(Instant::now)),
                    if self.reconnect_at.is_some() =>
                {
                    self.reconnect_at = None;
                    self.reconnect().await;
                }
            }

            self.run_deferred().await;
            if self.state.is_terminal() {
                break;
            }
        }

        debug!(session_id = %self.id, "Session actor stopped");
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Start { reply } => {
                let result = self.start().await;
                let _ = reply.send(result);
            }
            SessionCommand::Stop { reply } => {
                let result = self.stop().await;
                let _ = reply.send(result);
            }
            SessionCommand::SendMessage { to, content, reply } => {
                let result = self.send_message(&to, &content).await;
                let _ = reply.send(result);
            }
            SessionCommand::GetMetadata { reply } => {
                let _ = reply.send(self.metadata.clone());
            }
        }
    }

    async fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Created {
            return Err(SessionError::AlreadyStarted);
        }

        info!(session_id = %self.id, "Starting session");
        self.set_state(SessionState::Starting);
        self.emit_lifecycle(LifecycleEvent::Starting);

        if let Err(e) = self.connect().await {
            warn!(session_id = %self.id, error = %e, "Failed to start session");
            self.teardown(false);
            return Err(e);
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Connecting | SessionState::Connected => {
                let Some(connection) = self.connection.clone() else {
                    return Ok(());
                };
                info!(session_id = %self.id, "Logging out session");
                // The transport answers with a LoggedOut close, which tears down.
                if let Err(e) = connection.logout().await {
                    warn!(session_id = %self.id, error = %e, "Logout failed");
                    self.teardown(true);
                    return Err(e.into());
                }
                Ok(())
            }
            SessionState::Reconnecting => {
                info!(session_id = %self.id, "Stopping session while reconnecting");
                self.reconnect_at = None;
                self.teardown(true);
                Ok(())
            }
            SessionState::Created | SessionState::Starting | SessionState::LoggedOut => Ok(()),
        }
    }

    async fn send_message(
        &self,
        to: &str,
        content: &str,
    ) -> Result<Option<SendResult>, SessionError> {
        let connection = self.connection.as_ref().ok_or(SessionError::NotConnected)?;
        Ok(connection.send_message(to, content).await?)
    }

    // ========================================================================
    // Connection Setup
    // ========================================================================

    /// Load credentials and open a new connection, replacing the current one.
    async fn connect(&mut self) -> Result<(), SessionError> {
        let auth = self.credentials.load(&self.id).await?;
        let established = self
            .factory
            .connect(&self.id, auth, &self.settings.connect_options)
            .await?;

        self.transport_rx = Some(established.events);
        if let Some(previous) = self.connection.replace(established.connection) {
            previous.close().await;
        }
        self.set_state(SessionState::Connecting);
        Ok(())
    }

    async fn reconnect(&mut self) {
        info!(
            session_id = %self.id,
            attempt = self.reconnect_attempts,
            "Reconnecting session"
        );
        if let Err(e) = self.connect().await {
            warn!(
                session_id = %self.id,
                attempt = self.reconnect_attempts,
                error = %e,
                "Reconnect attempt failed"
            );
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        let policy = self.settings.reconnect;
        let attempt = self.reconnect_attempts + 1;
        if !policy.allows(attempt) {
            warn!(
                session_id = %self.id,
                attempts = self.reconnect_attempts,
                "Reconnect attempts exhausted"
            );
            self.teardown(false);
            return;
        }

        self.reconnect_attempts = attempt;
        debug!(
            session_id = %self.id,
            attempt,
            delay = ?policy.delay_for(attempt),
            "Reconnect scheduled"
        );
        self.reconnect_at = Some(policy.deadline_for(attempt, Instant::now()));
    }

    // ========================================================================
    // Transport Events
    // ========================================================================

    async fn handle_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::CredsUpdate(creds)) => self.on_creds_update(creds).await,
            Some(TransportEvent::ConnectionUpdate(update)) => self.on_connection_update(update),
            Some(TransportEvent::MessagesUpdate(updates)) => self.on_messages_update(updates),
            None => {
                warn!(session_id = %self.id, "Transport event channel closed");
                self.transport_rx = None;
                self.resolve_disconnect(DisconnectReason::ConnectionLost);
            }
        }
    }

    async fn on_creds_update(&mut self, creds: Credentials) {
        if let Err(e) = self.credentials.save(&self.id, &creds).await {
            warn!(session_id = %self.id, error = %e, "Failed to persist credentials");
        }

        if let Some(connection) = &self.connection {
            if let Some(identity) = connection.identity() {
                self.metadata
                    .insert(META_LINKED_ID.to_string(), identity.id.into());
            }
            if let Some(platform) = connection.platform() {
                self.metadata
                    .insert(META_PLATFORM.to_string(), platform.into());
            }
        }

        self.emit_raw(RawEvent::CredsUpdate {
            metadata: self.metadata.clone(),
        });
    }

    fn on_connection_update(&mut self, update: ConnectionUpdate) {
        self.metadata.insert(
            META_CONNECTION_STATE.to_string(),
            serde_json::to_value(&update).unwrap_or_default(),
        );
        self.emit_raw(RawEvent::ConnectionUpdate {
            metadata: self.metadata.clone(),
        });

        if let Some(qr) = &update.qr {
            self.emit_lifecycle(LifecycleEvent::QrCode(qr.clone()));
        }

        if update.is_open() {
            info!(session_id = %self.id, "Session connected");
            self.reconnect_attempts = 0;
            self.set_state(SessionState::Connected);
            self.emit_lifecycle(LifecycleEvent::Connected(self.metadata.clone()));
        } else if let Some(reason) = update.disconnect_reason() {
            self.resolve_disconnect(reason);
        }
    }

    fn on_messages_update(&mut self, updates: Vec<MessageStatusUpdate>) {
        self.emit_raw(RawEvent::MessagesUpdate {
            metadata: self.metadata.clone(),
            updates,
        });
    }

    fn resolve_disconnect(&mut self, reason: DisconnectReason) {
        if reason.is_restart_required() {
            info!(session_id = %self.id, code = reason.code(), "Transport requested restart");
            // Detach from the dead connection; the replacement brings its own channel.
            self.transport_rx = None;
            self.set_state(SessionState::Reconnecting);
            self.emit_lifecycle(LifecycleEvent::UnexpectedDisconnection);
            self.schedule_reconnect();
        } else {
            info!(session_id = %self.id, code = reason.code(), "Session disconnected");
            self.teardown(true);
        }
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Emit `logged_out` and queue cleanup. Runs at most once per session.
    fn teardown(&mut self, erase_credentials: bool) {
        if self.closing {
            return;
        }
        self.closing = true;
        self.reconnect_at = None;
        self.emit_lifecycle(LifecycleEvent::LoggedOut);
        self.deferred.push_back(Deferred::Cleanup { erase_credentials });
    }

    async fn run_deferred(&mut self) {
        while let Some(task) = self.deferred.pop_front() {
            match task {
                Deferred::Cleanup { erase_credentials } => self.cleanup(erase_credentials).await,
            }
        }
    }

    async fn cleanup(&mut self, erase_credentials: bool) {
        self.lifecycle.close();

        if erase_credentials && let Err(e) = self.credentials.delete(&self.id).await {
            warn!(session_id = %self.id, error = %e, "Failed to erase credentials");
        }

        self.transport_rx = None;
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
        self.set_state(SessionState::LoggedOut);
        self.raw.close();

        info!(
            session_id = %self.id,
            credentials_erased = erase_credentials,
            "Session logged out"
        );
    }

    /// Release everything without logging out. Credentials are kept and no
    /// `logged_out` is emitted.
    async fn detach(&mut self) {
        self.reconnect_at = None;
        self.transport_rx = None;
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
        self.lifecycle.close();
        self.raw.close();
        self.set_state(SessionState::LoggedOut);
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(session_id = %self.id, from = %self.state, to = %state, "Session state changed");
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn emit_lifecycle(&self, event: LifecycleEvent) {
        debug!(session_id = %self.id, event = event.kind(), "Lifecycle event");
        self.lifecycle.send(event);
    }

    fn emit_raw(&self, event: RawEvent) {
        self.raw.send(event);
    }
}

/// Next event from the transport, or pending forever when detached.
async fn next_event(rx: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
