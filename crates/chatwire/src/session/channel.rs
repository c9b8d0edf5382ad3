//! Closable broadcast channel.
//!
//! `tokio::sync::broadcast` only closes once every sender is dropped. Sessions
//! hand out clones of their channels to handles, so the actor keeps the one
//! sender behind a shared slot and closes the channel by emptying it.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

pub struct EventChannel<T> {
    sender: Arc<Mutex<Option<broadcast::Sender<T>>>>,
}

impl<T> Clone for EventChannel<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<T: Clone> EventChannel<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Publish to current subscribers. Returns the number of receivers
    /// reached; zero when nobody listens or the channel is closed.
    pub fn send(&self, event: T) -> usize {
        let guard = self.sender.lock().expect("mutex poisoned");
        match guard.as_ref() {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Subscribe to future events. On a closed channel the receiver reports
    /// `Closed` immediately.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        let guard = self.sender.lock().expect("mutex poisoned");
        match guard.as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Close the channel. Subscribers drain buffered events, then see
    /// `Closed`.
    pub fn close(&self) {
        self.sender.lock().expect("mutex poisoned").take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().expect("mutex poisoned").is_none()
    }
}
