//! Common test utilities: a scripted in-process transport and wait helpers.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use chatwire::session::{
    LifecycleEvent, ReconnectPolicy, SessionHandle, SessionRegistry, SessionSettings,
    SessionState,
};
use chatwire::store::CredentialStore;
use chatwire_transport::{
    AuthState, ConnectOptions, Connection, ConnectionFactory, ConnectionUpdate, Credentials,
    DisconnectReason, Established, LinkedIdentity, MessageStatusUpdate, SendResult,
    TransportError, TransportEvent,
};

/// Upper bound for any single wait in these tests.
pub const TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Fake Connection
// ============================================================================

type ScriptedSend = Result<Option<SendResult>, TransportError>;

pub struct FakeConnection {
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    send_results: Mutex<VecDeque<ScriptedSend>>,
    sent: Mutex<Vec<(String, String)>>,
    counter: AtomicUsize,
    identity: Mutex<Option<LinkedIdentity>>,
    platform: Mutex<Option<String>>,
    fail_logout: AtomicBool,
    logged_out: AtomicBool,
    closed: AtomicBool,
}

impl FakeConnection {
    fn new(events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            events: Mutex::new(Some(events)),
            send_results: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
            identity: Mutex::new(None),
            platform: Mutex::new(None),
            fail_logout: AtomicBool::new(false),
            logged_out: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Push an event to the session. Returns false once the session detached.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        let tx = self.events.lock().unwrap().clone();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    pub async fn qr(&self, code: &str) -> bool {
        self.emit(TransportEvent::ConnectionUpdate(ConnectionUpdate::qr(code)))
            .await
    }

    pub async fn open(&self) -> bool {
        self.emit(TransportEvent::ConnectionUpdate(ConnectionUpdate::open()))
            .await
    }

    pub async fn close(&self, reason: DisconnectReason) -> bool {
        self.emit(TransportEvent::ConnectionUpdate(ConnectionUpdate::closed(
            reason,
        )))
        .await
    }

    pub async fn creds(&self, creds: Credentials) -> bool {
        self.emit(TransportEvent::CredsUpdate(creds)).await
    }

    pub async fn statuses(&self, updates: &[(&str, i32)]) -> bool {
        let updates = updates
            .iter()
            .map(|(id, status)| MessageStatusUpdate {
                message_id: id.to_string(),
                status: *status,
            })
            .collect();
        self.emit(TransportEvent::MessagesUpdate(updates)).await
    }

    /// Drop the event sender without reporting a close.
    pub fn drop_events(&self) {
        self.events.lock().unwrap().take();
    }

    pub fn set_identity(&self, id: &str, platform: &str) {
        *self.identity.lock().unwrap() = Some(LinkedIdentity::new(id));
        *self.platform.lock().unwrap() = Some(platform.to_string());
    }

    /// Queue the result of the next `send_message` call.
    pub fn script_send(&self, result: ScriptedSend) {
        self.send_results.lock().unwrap().push_back(result);
    }

    pub fn fail_logout(&self) {
        self.fail_logout.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn send_message(&self, to: &str, content: &str) -> ScriptedSend {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), content.to_string()));
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let scripted = self.send_results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(Some(SendResult::new(format!("MSG{n}"), 1))))
    }

    async fn logout(&self) -> Result<(), TransportError> {
        if self.fail_logout.load(Ordering::SeqCst) {
            return Err(TransportError::Logout("scripted failure".to_string()));
        }
        self.logged_out.store(true, Ordering::SeqCst);
        let tx = self.events.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.try_send(TransportEvent::ConnectionUpdate(ConnectionUpdate::closed(
                DisconnectReason::LoggedOut,
            )));
        }
        Ok(())
    }

    fn identity(&self) -> Option<LinkedIdentity> {
        self.identity.lock().unwrap().clone()
    }

    fn platform(&self) -> Option<String> {
        self.platform.lock().unwrap().clone()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Fake Factory
// ============================================================================

#[derive(Default)]
pub struct FakeFactory {
    connections: Mutex<Vec<(String, Arc<FakeConnection>)>>,
    attempts: Mutex<Vec<(String, AuthState)>>,
    fail_next: AtomicUsize,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `n` connect calls fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Most recent successful connection for a session.
    pub fn latest(&self, session_id: &str) -> Option<Arc<FakeConnection>> {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _)| id == session_id)
            .map(|(_, conn)| conn.clone())
    }

    /// Successful connections opened for a session.
    pub fn count(&self, session_id: &str) -> usize {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == session_id)
            .count()
    }

    /// Connect calls made for a session, successful or not.
    pub fn attempts(&self, session_id: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == session_id)
            .count()
    }

    /// Auth state handed to the most recent connect call for a session.
    pub fn last_auth(&self, session_id: &str) -> Option<AuthState> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _)| id == session_id)
            .map(|(_, auth)| auth.clone())
    }
}

#[async_trait]
impl ConnectionFactory for FakeFactory {
    async fn connect(
        &self,
        session_id: &str,
        auth: AuthState,
        _options: &ConnectOptions,
    ) -> Result<Established, TransportError> {
        self.attempts
            .lock()
            .unwrap()
            .push((session_id.to_string(), auth));

        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::Connect("scripted failure".to_string()));
        }

        let (tx, rx) = mpsc::channel(64);
        let connection = Arc::new(FakeConnection::new(tx));
        self.connections
            .lock()
            .unwrap()
            .push((session_id.to_string(), connection.clone()));

        Ok(Established {
            connection,
            events: rx,
        })
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Session settings with a short reconnect schedule.
pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        reconnect: ReconnectPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        },
        ..Default::default()
    }
}

pub fn registry_with(
    credentials: Arc<dyn CredentialStore>,
    factory: Arc<FakeFactory>,
) -> SessionRegistry {
    SessionRegistry::new(credentials, factory, fast_settings())
}

pub fn paired_creds(id: &str) -> Credentials {
    Credentials {
        me: Some(LinkedIdentity::new(id)),
        platform: Some("android".to_string()),
        data: serde_json::json!({ "noise_key": "a2V5" }),
    }
}

// ============================================================================
// Waiting
// ============================================================================

/// Next lifecycle event, or `None` once the channel is closed.
pub async fn next_lifecycle(
    rx: &mut broadcast::Receiver<LifecycleEvent>,
) -> Option<LifecycleEvent> {
    next_event(rx).await
}

/// Next event from a broadcast receiver, or `None` once it is closed.
pub async fn next_event<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Option<T> {
    match tokio::time::timeout(TIMEOUT, rx.recv()).await {
        Ok(Ok(event)) => Some(event),
        Ok(Err(broadcast::error::RecvError::Closed)) => None,
        Ok(Err(broadcast::error::RecvError::Lagged(n))) => panic!("receiver lagged by {n}"),
        Err(_) => panic!("timed out waiting for event"),
    }
}

pub async fn wait_for_state(handle: &SessionHandle, state: SessionState) {
    let mut rx = handle.watch_state();
    tokio::time::timeout(TIMEOUT, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for state {state}"))
        .unwrap_or_else(|_| panic!("state channel closed before {state}"));
}

/// Poll `check` until it returns true.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until the factory has opened `n` connections for a session and
/// return the latest.
pub async fn wait_for_connection(
    factory: &FakeFactory,
    session_id: &str,
    n: usize,
) -> Arc<FakeConnection> {
    eventually(|| async move { factory.count(session_id) >= n }).await;
    factory
        .latest(session_id)
        .unwrap_or_else(|| panic!("no connection for {session_id}"))
}
