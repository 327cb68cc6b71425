use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use futures::{future, FutureExt};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::transport::{
    ConnectAttempt, ConnectionState, Destination, Transport, TransportError, TransportEvent,
};

/// In-memory transport that records every publish.
#[derive(Clone)]
pub struct RecordingTransport {
    published: Arc<Mutex<Vec<(Destination, String)>>>,
    state: Arc<Mutex<ConnectionState>>,
    events: Arc<Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>>,
    connect_calls: Arc<AtomicUsize>,
    fail_connect: Arc<AtomicBool>,
    stall_connect: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl RecordingTransport {
    pub fn disconnected() -> Self {
        Self {
            published: Arc::new(Mutex::new(Vec::new())),
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            events: Arc::new(Mutex::new(None)),
            connect_calls: Arc::new(AtomicUsize::new(0)),
            fail_connect: Arc::new(AtomicBool::new(false)),
            stall_connect: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn connected() -> Self {
        let transport = Self::disconnected();
        *transport.state.lock().expect("state") = ConnectionState::Connected;
        transport
    }

    pub fn published(&self) -> Vec<(Destination, String)> {
        self.published.lock().expect("published").clone()
    }

    /// Bodies sent to the command channel, parsed.
    pub fn commands(&self) -> Vec<Value> {
        self.published()
            .into_iter()
            .filter(|(destination, _)| *destination == Destination::Command)
            .map(|(_, body)| serde_json::from_str(&body).expect("command json"))
            .collect()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Leaves every later connect attempt stuck in `Connecting`.
    pub fn set_stall_connect(&self, stall: bool) {
        self.stall_connect.store(stall, Ordering::SeqCst);
    }

    /// Delivers an event as if the broker had sent it.
    pub fn emit(&self, event: TransportEvent) {
        if let TransportEvent::ConnectionChanged(state) = event {
            *self.state.lock().expect("state") = state;
        }
        if let Some(events) = self.events.lock().expect("events").as_ref() {
            let _ = events.send(event);
        }
    }

    fn set_state(&self, next: ConnectionState) {
        *self.state.lock().expect("state") = next;
        if let Some(events) = self.events.lock().expect("events").as_ref() {
            let _ = events.send(TransportEvent::ConnectionChanged(next));
        }
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn connect(&mut self, events: mpsc::UnboundedSender<TransportEvent>) -> ConnectAttempt {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        *self.events.lock().expect("events") = Some(events);
        self.set_state(ConnectionState::Connecting);
        if self.stall_connect.load(Ordering::SeqCst) {
            return future::pending().boxed();
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::Disconnected);
            return future::ready(Err(TransportError::Handshake("refused".to_string()))).boxed();
        }
        self.set_state(ConnectionState::Connected);
        future::ready(Ok(())).boxed()
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().expect("state")
    }

    fn publish(&self, destination: Destination, payload: String) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.published
            .lock()
            .expect("published")
            .push((destination, payload));
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
    }
}
