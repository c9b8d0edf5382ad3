//! Session registry for managing actor lifecycles.
//!
//! The registry is responsible for:
//! - Creating session actors and keeping at most one per id
//! - Forwarding every session's lifecycle events into one global stream
//! - Dropping a session from the index once it has logged out
//! - Graceful shutdown of all actors

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chatwire_transport::{ConnectionFactory, SendResult};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::Stream;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::dispatch::{ConnectionLookup, SessionLookup};
use crate::store::{CredentialStore, is_valid_id};
use crate::sync::KeyedLocks;

use super::actor::SessionActor;
use super::actor_types::{ActorConfig, SessionError, SessionSettings};
use super::events::{GlobalEvent, LifecycleEvent};
use super::handle::SessionHandle;

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A session with this id is already registered.
    #[error("session already active: {0}")]
    AlreadyActive(String),

    /// The id is empty, contains a path separator, or starts with `.`.
    #[error("invalid session id: '{0}'")]
    InvalidId(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

// ============================================================================
// Session Registry
// ============================================================================

/// Registry for session actors.
///
/// Thread-safe and cheap to clone.
#[derive(Clone)]
pub struct SessionRegistry {
    /// Session handles by ID.
    handles: Arc<DashMap<String, SessionHandle>>,
    /// Serializes start/stop per session id.
    locks: KeyedLocks,
    /// Actor and bridge task handles for graceful shutdown.
    task_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    credentials: Arc<dyn CredentialStore>,
    factory: Arc<dyn ConnectionFactory>,
    settings: SessionSettings,
    /// Lifecycle events of every session, tagged with the session id.
    global: broadcast::Sender<GlobalEvent>,
    /// Shutdown signal sender.
    shutdown_tx: Arc<watch::Sender<bool>>,
    /// Shutdown signal receiver (cloned for each actor).
    shutdown_rx: watch::Receiver<bool>,
}

impl SessionRegistry {
    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        factory: Arc<dyn ConnectionFactory>,
        settings: SessionSettings,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (global, _) = broadcast::channel(settings.event_capacity.max(1));

        Self {
            handles: Arc::new(DashMap::new()),
            locks: KeyedLocks::new(),
            task_handles: Arc::new(Mutex::new(Vec::new())),
            credentials,
            factory,
            settings,
            global,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Stop every session without logging out and wait for their tasks.
    ///
    /// Credentials stay in the store, so sessions can be started again later.
    pub async fn shutdown(&self) {
        info!(sessions = self.handles.len(), "Shutting down session registry");

        self.shutdown_tx.send_replace(true);

        let task_handles = {
            let mut guard = self.task_handles.lock().expect("mutex poisoned");
            std::mem::take(&mut *guard)
        };

        for task_handle in task_handles {
            if let Err(e) = task_handle.await {
                warn!(error = ?e, "Session task panicked during shutdown");
            }
        }

        self.handles.clear();
        info!("Session registry shutdown complete");
    }

    // ------------------------------------------------------------------------
    // Core API
    // ------------------------------------------------------------------------

    pub fn is_session_active(&self, id: &str) -> bool {
        self.handles.contains_key(id)
    }

    pub fn get_session(&self, id: &str) -> Option<SessionHandle> {
        self.handles.get(id).map(|r| r.clone())
    }

    /// Create a session in the `Created` state and register it.
    ///
    /// The lifecycle bridge is subscribed before this returns, so no event
    /// emitted after `start()` can be missed by the global stream.
    pub fn create_session(&self, id: &str) -> Result<SessionHandle, RegistryError> {
        if !is_valid_id(id) {
            return Err(RegistryError::InvalidId(id.to_string()));
        }

        let slot = match self.handles.entry(id.to_string()) {
            Entry::Occupied(_) => return Err(RegistryError::AlreadyActive(id.to_string())),
            Entry::Vacant(slot) => slot,
        };

        let config = ActorConfig {
            id: id.to_string(),
            credentials: self.credentials.clone(),
            factory: self.factory.clone(),
            settings: self.settings.clone(),
        };
        let (handle, actor_task) = SessionActor::spawn(config, self.shutdown_rx.clone());
        let lifecycle_rx = handle.subscribe_lifecycle();
        slot.insert(handle.clone());

        let bridge_task = tokio::spawn(bridge_lifecycle(
            id.to_string(),
            handle.instance(),
            lifecycle_rx,
            self.handles.clone(),
            self.global.clone(),
        ));

        {
            let mut guard = self.task_handles.lock().expect("mutex poisoned");
            guard.retain(|h| !h.is_finished());
            guard.push(actor_task);
            guard.push(bridge_task);
        }

        debug!(session_id = %id, instance = %handle.instance(), "Session created");
        Ok(handle)
    }

    /// Create and start a session.
    ///
    /// Calls for the same id are serialized; a second call while the first
    /// session is registered fails with `AlreadyActive`.
    pub async fn start_session(&self, id: &str) -> Result<SessionHandle, RegistryError> {
        let lock = self.locks.get(id);
        let result = {
            let _guard = lock.lock().await;
            self.start_locked(id).await
        };
        drop(lock);
        self.locks.release(id);
        result
    }

    async fn start_locked(&self, id: &str) -> Result<SessionHandle, RegistryError> {
        if self.is_session_active(id) {
            return Err(RegistryError::AlreadyActive(id.to_string()));
        }

        let handle = self.create_session(id)?;
        if let Err(e) = handle.start().await {
            // The bridge deregisters too, but not before the lock is released.
            let instance = handle.instance();
            self.handles.remove_if(id, |_, h| h.instance() == instance);
            return Err(e.into());
        }
        Ok(handle)
    }

    /// Log a session out. Does nothing when no session has this id.
    pub async fn stop_session(&self, id: &str) -> Result<(), RegistryError> {
        let lock = self.locks.get(id);
        let result = {
            let _guard = lock.lock().await;
            match self.get_session(id) {
                Some(handle) => handle.stop().await.map_err(RegistryError::from),
                None => Ok(()),
            }
        };
        drop(lock);
        self.locks.release(id);
        result
    }

    /// Ids of all registered sessions, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handles.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    // ------------------------------------------------------------------------
    // Global Events
    // ------------------------------------------------------------------------

    /// Subscribe to lifecycle events of every session.
    pub fn subscribe(&self) -> broadcast::Receiver<GlobalEvent> {
        self.global.subscribe()
    }

    /// Global events as a stream. Events lost to lag are skipped.
    pub fn events(&self) -> impl Stream<Item = GlobalEvent> + Send + 'static {
        BroadcastStream::new(self.subscribe()).filter_map(Result::ok)
    }
}

/// Forward one session's lifecycle events into the global stream and
/// deregister the session once it is gone.
async fn bridge_lifecycle(
    session_id: String,
    instance: Ulid,
    mut rx: broadcast::Receiver<LifecycleEvent>,
    handles: Arc<DashMap<String, SessionHandle>>,
    global: broadcast::Sender<GlobalEvent>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let logged_out = event.is_logged_out();
                let _ = global.send(GlobalEvent {
                    session_id: session_id.clone(),
                    event,
                });
                if logged_out {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(session_id = %session_id, skipped, "Lifecycle bridge lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }

    // Only remove the instance this bridge belongs to.
    if handles
        .remove_if(&session_id, |_, handle| handle.instance() == instance)
        .is_some()
    {
        debug!(session_id = %session_id, "Session deregistered");
    }
}

// ============================================================================
// Dispatch Lookups
// ============================================================================

impl SessionLookup for SessionRegistry {
    fn has_session(&self, session_id: &str) -> bool {
        self.is_session_active(session_id)
    }
}

#[async_trait]
impl ConnectionLookup for SessionRegistry {
    fn has_connection(&self, session_id: &str) -> bool {
        self.get_session(session_id)
            .is_some_and(|handle| handle.has_connection())
    }

    async fn send(
        &self,
        session_id: &str,
        to: &str,
        content: &str,
    ) -> Result<Option<SendResult>, SessionError> {
        let handle = self
            .get_session(session_id)
            .ok_or(SessionError::NotConnected)?;
        handle.send_message(to, content).await
    }
}
