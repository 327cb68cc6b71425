use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{
    future::BoxFuture,
    stream::{SplitSink, SplitStream},
    FutureExt, SinkExt, StreamExt,
};
use shared::{
    error::ProtocolError,
    protocol::{decode_session_load, decode_update, SessionLoadResult, Update},
};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::stomp::{decode_frames, Frame, StompCommand, StompError};

const CLOSE_GRACE: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Result topics subscribed on every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    CommandResult,
    LoadCommandResult,
    NewBuildingResult,
    LoadSessionResult,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::CommandResult,
        Topic::LoadCommandResult,
        Topic::NewBuildingResult,
        Topic::LoadSessionResult,
    ];

    pub fn destination(self) -> &'static str {
        match self {
            Topic::CommandResult => "/topic/command-result",
            Topic::LoadCommandResult => "/topic/loadCommand-result",
            Topic::NewBuildingResult => "/topic/newBuilding-result",
            Topic::LoadSessionResult => "/topic/loadSession-result",
        }
    }

    pub fn from_destination(destination: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|topic| topic.destination() == destination)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Command,
    NewBuilding,
    LoadCommand,
    LoadSession,
}

impl Destination {
    pub fn path(self) -> &'static str {
        match self {
            Destination::Command => "/app/command",
            Destination::NewBuilding => "/app/newBuilding",
            Destination::LoadCommand => "/app/loadCommand",
            Destination::LoadSession => "/app/loadSession",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ConnectionChanged(ConnectionState),
    Update { topic: Topic, update: Update },
    SessionLoaded(SessionLoadResult),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("timed out after {0:?} connecting to broker")]
    ConnectTimeout(Duration),
    #[error("connection attempt was cancelled")]
    Cancelled,
    #[error("websocket failure: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("broker rejected the connection: {0}")]
    Handshake(String),
    #[error("malformed frame: {0}")]
    Frame(#[from] StompError),
}

/// Decodes the body of a MESSAGE frame received on one topic.
pub type MessageHandler =
    Arc<dyn Fn(&str) -> Result<TransportEvent, ProtocolError> + Send + Sync + 'static>;

/// Outcome of one connection attempt. The attempt runs on its own task, so
/// dropping this future does not cancel it; `close` does.
pub type ConnectAttempt = BoxFuture<'static, Result<(), TransportError>>;

#[async_trait]
pub trait Transport: Send {
    /// Starts connecting and returns at once. Progress is reported as
    /// `ConnectionChanged` events on `events`.
    fn connect(&mut self, events: mpsc::UnboundedSender<TransportEvent>) -> ConnectAttempt;
    fn state(&self) -> ConnectionState;
    /// Sends only while connected; otherwise performs no network action.
    fn publish(&self, destination: Destination, payload: String) -> Result<(), TransportError>;
    /// Also cancels an attempt that has not finished its handshake.
    async fn close(&mut self);

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

pub struct TransportClient {
    url: Url,
    connect_timeout: Duration,
    handlers: HashMap<Topic, MessageHandler>,
    state: Arc<watch::Sender<ConnectionState>>,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    link_task: Option<JoinHandle<()>>,
}

impl TransportClient {
    pub fn new(url: Url, connect_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let mut client = Self {
            url,
            connect_timeout,
            handlers: HashMap::new(),
            state: Arc::new(state),
            events: None,
            outbound: None,
            link_task: None,
        };
        for topic in Topic::ALL {
            client.on_message(topic, move |body| default_decode(topic, body));
        }
        client
    }

    /// Replaces the decoder for one topic. Takes effect on the next connect.
    pub fn on_message<F>(&mut self, topic: Topic, handler: F)
    where
        F: Fn(&str) -> Result<TransportEvent, ProtocolError> + Send + Sync + 'static,
    {
        self.handlers.insert(topic, Arc::new(handler));
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn stop_link(&mut self) {
        self.outbound = None;
        if let Some(task) = self.link_task.take() {
            task.abort();
        }
    }
}

impl Drop for TransportClient {
    fn drop(&mut self) {
        self.stop_link();
    }
}

#[async_trait]
impl Transport for TransportClient {
    fn connect(&mut self, events: mpsc::UnboundedSender<TransportEvent>) -> ConnectAttempt {
        self.stop_link();
        self.events = Some(events.clone());
        set_state(&self.state, &events, ConnectionState::Connecting);
        info!(url = %self.url, "transport: connecting");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.outbound = Some(outbound_tx);
        let (result_tx, result_rx) = oneshot::channel();
        let link = Link {
            url: self.url.clone(),
            connect_timeout: self.connect_timeout,
            handlers: self.handlers.clone(),
            state: Arc::clone(&self.state),
            events,
        };
        self.link_task = Some(tokio::spawn(link.run(outbound_rx, result_tx)));

        async move { result_rx.await.unwrap_or(Err(TransportError::Cancelled)) }.boxed()
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn publish(&self, destination: Destination, payload: String) -> Result<(), TransportError> {
        let outbound = match (&self.outbound, self.is_connected()) {
            (Some(outbound), true) => outbound,
            _ => {
                warn!(
                    destination = destination.path(),
                    "transport: publish skipped while disconnected"
                );
                return Err(TransportError::NotConnected);
            }
        };
        outbound
            .send(Frame::send(destination.path(), payload))
            .map_err(|_| TransportError::NotConnected)
    }

    async fn close(&mut self) {
        let connected = self.is_connected();
        if let Some(outbound) = self.outbound.take() {
            if connected {
                for index in 0..Topic::ALL.len() {
                    let _ = outbound.send(Frame::unsubscribe(&subscription_id(index)));
                }
                let _ = outbound.send(Frame::disconnect());
            }
        }
        if let Some(mut task) = self.link_task.take() {
            if connected && tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                warn!("transport: writer did not finish before close deadline");
            }
            task.abort();
        }
        if let Some(events) = &self.events {
            set_state(&self.state, events, ConnectionState::Disconnected);
        }
        info!(url = %self.url, "transport: closed");
    }
}

/// One broker connection, from handshake until either side goes away.
struct Link {
    url: Url,
    connect_timeout: Duration,
    handlers: HashMap<Topic, MessageHandler>,
    state: Arc<watch::Sender<ConnectionState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Link {
    async fn run(
        self,
        outbound: mpsc::UnboundedReceiver<Frame>,
        result: oneshot::Sender<Result<(), TransportError>>,
    ) {
        let (sink, stream) = match self.open().await {
            Ok(halves) => halves,
            Err(err) => {
                warn!(url = %self.url, error = %err, "transport: connect failed");
                set_state(&self.state, &self.events, ConnectionState::Disconnected);
                let _ = result.send(Err(err));
                return;
            }
        };
        set_state(&self.state, &self.events, ConnectionState::Connected);
        info!(url = %self.url, "transport: connected");
        let _ = result.send(Ok(()));

        tokio::select! {
            _ = write_frames(sink, outbound) => {}
            _ = self.read_frames(stream) => {}
        }
        info!("transport: connection lost");
        set_state(&self.state, &self.events, ConnectionState::Disconnected);
    }

    async fn open(&self) -> Result<(WsSink, WsSource), TransportError> {
        let host = self.url.host_str().unwrap_or("localhost").to_string();
        let (mut sink, stream) =
            tokio::time::timeout(self.connect_timeout, handshake(&self.url, &host))
                .await
                .map_err(|_| TransportError::ConnectTimeout(self.connect_timeout))??;
        for (index, topic) in Topic::ALL.into_iter().enumerate() {
            let frame = Frame::subscribe(&subscription_id(index), topic.destination());
            sink.send(Message::Text(frame.encode())).await?;
        }
        Ok((sink, stream))
    }

    async fn read_frames(&self, mut stream: WsSource) {
        while let Some(msg) = stream.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => return,
                Ok(_) => continue,
                Err(err) => {
                    warn!(error = %err, "transport: read failed");
                    return;
                }
            };
            let frames = match decode_frames(&text) {
                Ok(frames) => frames,
                Err(err) => {
                    warn!(error = %err, "transport: dropping undecodable message");
                    continue;
                }
            };
            let mut broker_error = false;
            for frame in frames {
                match frame.command {
                    StompCommand::Message => dispatch_message(&self.handlers, &frame, &self.events),
                    StompCommand::Error => {
                        warn!(message = %error_text(&frame), "transport: broker sent ERROR");
                        broker_error = true;
                    }
                    _ => {}
                }
            }
            if broker_error {
                return;
            }
        }
    }
}

/// Returns when the outbound queue closes or a write fails.
async fn write_frames(mut sink: WsSink, mut outbound: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = outbound.recv().await {
        debug!(command = %frame.command, "transport: sending frame");
        if let Err(err) = sink.send(Message::Text(frame.encode())).await {
            warn!(error = %err, "transport: write failed");
            return;
        }
    }
    let _ = sink.close().await;
}

fn subscription_id(index: usize) -> String {
    format!("sub-{index}")
}

async fn handshake(url: &Url, host: &str) -> Result<(WsSink, WsSource), TransportError> {
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    let (mut sink, mut stream) = ws_stream.split();
    sink.send(Message::Text(Frame::connect(host, (0, 0)).encode()))
        .await?;

    while let Some(msg) = stream.next().await {
        let text = match msg? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        for frame in decode_frames(&text)? {
            match frame.command {
                StompCommand::Connected => return Ok((sink, stream)),
                StompCommand::Error => return Err(TransportError::Handshake(error_text(&frame))),
                _ => {}
            }
        }
    }
    Err(TransportError::Handshake(
        "connection closed before CONNECTED".to_string(),
    ))
}

fn default_decode(topic: Topic, body: &str) -> Result<TransportEvent, ProtocolError> {
    match topic {
        Topic::LoadSessionResult => decode_session_load(body).map(TransportEvent::SessionLoaded),
        _ => decode_update(body).map(|update| TransportEvent::Update { topic, update }),
    }
}

fn dispatch_message(
    handlers: &HashMap<Topic, MessageHandler>,
    frame: &Frame,
    events: &mpsc::UnboundedSender<TransportEvent>,
) {
    let Some(topic) = frame.header("destination").and_then(Topic::from_destination) else {
        warn!(
            destination = frame.header("destination").unwrap_or_default(),
            "transport: message on unexpected destination"
        );
        return;
    };
    let Some(handler) = handlers.get(&topic) else {
        return;
    };
    match handler(&frame.body) {
        Ok(event) => {
            let _ = events.send(event);
        }
        Err(err) => warn!(
            topic = topic.destination(),
            error = %err,
            "transport: rejected invalid payload"
        ),
    }
}

fn error_text(frame: &Frame) -> String {
    frame
        .header("message")
        .map(str::to_string)
        .unwrap_or_else(|| frame.body.trim().to_string())
}

/// Publishes a transition only when the state actually changes.
fn set_state(
    state: &watch::Sender<ConnectionState>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    next: ConnectionState,
) {
    let previous = state.send_replace(next);
    if previous != next {
        let _ = events.send(TransportEvent::ConnectionChanged(next));
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
