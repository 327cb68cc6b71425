//! The top-level state owner: one task that multiplexes transport events,
//! user gestures, auto-step ticks and reconnect timers.

use std::{fmt::Display, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use futures::future::OptionFuture;
use shared::{domain::SessionId, protocol::NewBuildingRequest};
use tokio::{
    sync::{broadcast, mpsc},
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    commands::Command,
    config::Settings,
    downloads,
    interaction::{ContextMenu, HoverState, InteractionController, InteractionError, MenuAction},
    router::{RouterError, SessionCommandRouter, SessionLoadOutcome, UpdateOutcome},
    scene::{HitTarget, Point, Scene, ViewModelBuilder, Viewport},
    session::SessionStore,
    transport::{ConnectAttempt, ConnectionState, Transport, TransportError, TransportEvent},
};

pub const DEFAULT_CANVAS_WIDTH: f64 = 800.0;
pub const DEFAULT_CANVAS_HEIGHT: f64 = 600.0;
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ViewOptions {
    pub viewport: Viewport,
    pub auto_step_period: Duration,
    /// Zero disables reconnecting.
    pub reconnect_delay: Duration,
    pub download_dir: PathBuf,
}

impl ViewOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            viewport: Viewport::new(DEFAULT_CANVAS_WIDTH, DEFAULT_CANVAS_HEIGHT, settings.cell_size),
            auto_step_period: settings.auto_step_period,
            reconnect_delay: settings.reconnect_delay,
            download_dir: settings.download_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Gesture {
    /// A typed command or submitted command form.
    Command(Command),
    Step,
    SetStepCount(String),
    ToggleAutoStep,
    PointerMoved(Point),
    ContextClick(Point),
    MenuChoice(MenuAction),
    CloseMenu,
    CreateBuilding(NewBuildingRequest),
    Save(String),
    Load(PathBuf),
    LoadSession(SessionId),
    DismissNotification,
    Resize { width: f64, height: f64 },
    Quit,
}

#[derive(Debug, Clone)]
pub enum ViewEvent {
    ConnectivityChanged(ConnectionState),
    SceneUpdated(Arc<Scene>),
    Notification(String),
    NotificationDismissed,
    SaveMaterialized(PathBuf),
    SessionLoaded(SessionId),
    TooltipChanged(HoverState),
    ContextMenuOpened(ContextMenu),
    ContextMenuClosed,
    AutoStepChanged(bool),
    /// A gesture was refused; the text is meant for inline display.
    Rejected(String),
}

pub struct SimulationView<T: Transport> {
    router: SessionCommandRouter<T>,
    controller: InteractionController,
    builder: ViewModelBuilder,
    scene: Arc<Scene>,
    options: ViewOptions,
    store: Option<SessionStore>,
    events: broadcast::Sender<ViewEvent>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    transport_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    tick_tx: mpsc::UnboundedSender<u64>,
    tick_rx: Option<mpsc::UnboundedReceiver<u64>>,
    reconnect_at: Option<Instant>,
    shutting_down: bool,
}

impl<T: Transport> SimulationView<T> {
    pub fn new(
        transport: T,
        session: Option<SessionId>,
        options: ViewOptions,
        store: Option<SessionStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let builder = ViewModelBuilder::new(options.viewport);
        let scene = Arc::new(builder.build(0, &[], &[]));
        Self {
            router: SessionCommandRouter::new(transport, session),
            controller: InteractionController::new(options.auto_step_period),
            builder,
            scene,
            options,
            store,
            events,
            transport_tx,
            transport_rx: Some(transport_rx),
            tick_tx,
            tick_rx: Some(tick_rx),
            reconnect_at: None,
            shutting_down: false,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ViewEvent> {
        self.events.subscribe()
    }

    pub fn scene(&self) -> Arc<Scene> {
        Arc::clone(&self.scene)
    }

    pub fn router(&self) -> &SessionCommandRouter<T> {
        &self.router
    }

    /// Runs until a `Quit` gesture or until the gesture channel closes, then
    /// stops auto-step and closes the transport. Connection attempts run
    /// alongside the loop and are abandoned on quit.
    pub async fn run(mut self, mut gestures: mpsc::UnboundedReceiver<Gesture>) -> anyhow::Result<()> {
        let mut transport_rx = self
            .transport_rx
            .take()
            .context("simulation view is already running")?;
        let mut tick_rx = self
            .tick_rx
            .take()
            .context("simulation view is already running")?;

        let mut attempt: Option<ConnectAttempt> = Some(self.connect());
        loop {
            let reconnect_at = self.reconnect_at;
            tokio::select! {
                Some(event) = transport_rx.recv() => self.on_transport_event(event),
                gesture = gestures.recv() => match gesture {
                    Some(Gesture::Quit) | None => break,
                    Some(gesture) => self.on_gesture(gesture),
                },
                Some(tick) = tick_rx.recv() => self.on_tick(tick),
                Some(result) = OptionFuture::from(attempt.as_mut()), if attempt.is_some() => {
                    attempt = None;
                    if let Err(err) = result {
                        warn!(error = %err, "view: connection attempt failed");
                        self.schedule_reconnect();
                    }
                }
                _ = sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                    attempt = Some(self.connect());
                }
            }
        }

        drop(attempt);
        self.shutdown().await;
        Ok(())
    }

    fn emit(&self, event: ViewEvent) {
        let _ = self.events.send(event);
    }

    fn reject(&self, err: impl Display) {
        let message = err.to_string();
        debug!(%message, "view: gesture rejected");
        self.emit(ViewEvent::Rejected(message));
    }

    fn connect(&mut self) -> ConnectAttempt {
        self.reconnect_at = None;
        info!(session_id = ?self.router.session_id().map(|id| id.0), "view: connecting");
        self.router
            .transport_mut()
            .connect(self.transport_tx.clone())
    }

    fn schedule_reconnect(&mut self) {
        if self.shutting_down || self.options.reconnect_delay.is_zero() || self.reconnect_at.is_some() {
            return;
        }
        let delay = self.options.reconnect_delay;
        info!(delay_ms = delay.as_millis() as u64, "view: reconnect scheduled");
        self.reconnect_at = Some(Instant::now() + delay);
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ConnectionChanged(state) => self.on_connectivity(state),
            TransportEvent::Update { topic, update } => {
                debug!(?topic, session_id = update.id.0, "view: update received");
                let outcome = self.router.on_update(update);
                self.on_update_outcome(outcome);
            }
            TransportEvent::SessionLoaded(result) => {
                let outcome = self.router.on_session_loaded(result);
                self.on_session_load_outcome(outcome);
            }
        }
    }

    fn on_connectivity(&mut self, state: ConnectionState) {
        self.router.set_connectivity(state);
        self.controller.set_connectivity(state);
        self.emit(ViewEvent::ConnectivityChanged(state));

        match state {
            ConnectionState::Connected => {
                self.reconnect_at = None;
                if let Some(id) = self.router.session_id() {
                    if let Err(err) = self.router.load_session(id) {
                        warn!(session_id = id.0, error = %err, "view: failed to request session state");
                    }
                }
            }
            ConnectionState::Disconnected => self.schedule_reconnect(),
            ConnectionState::Connecting => {}
        }
    }

    fn on_update_outcome(&mut self, outcome: UpdateOutcome) {
        match outcome {
            UpdateOutcome::Ignored { .. } => {}
            UpdateOutcome::Failed { message } => self.emit(ViewEvent::Notification(message)),
            UpdateOutcome::Applied { save } => {
                self.rebuild_scene();
                if let Some(artifact) = save {
                    match downloads::save_artifact(&self.options.download_dir, &artifact) {
                        Ok(path) => self.emit(ViewEvent::SaveMaterialized(path)),
                        Err(err) => {
                            warn!(filename = %artifact.filename, error = %err, "view: failed to write save file");
                            self.emit(ViewEvent::Notification(err.to_string()));
                        }
                    }
                }
            }
        }
    }

    fn on_session_load_outcome(&mut self, outcome: SessionLoadOutcome) {
        match outcome {
            SessionLoadOutcome::Ignored => {}
            SessionLoadOutcome::Failed { message } => self.emit(ViewEvent::Notification(message)),
            SessionLoadOutcome::Loaded { id } => {
                if let Some(store) = &self.store {
                    if let Err(err) = store.save(id) {
                        warn!(session_id = id.0, error = %err, "view: failed to persist session");
                    }
                }
                self.rebuild_scene();
                self.emit(ViewEvent::SessionLoaded(id));
            }
        }
    }

    fn rebuild_scene(&mut self) {
        let state = self.router.state();
        self.scene = Arc::new(self.builder.build(state.cycle, &state.buildings, &state.roads));
        self.emit(ViewEvent::SceneUpdated(Arc::clone(&self.scene)));
    }

    fn dispatch(&mut self, command: Result<Command, InteractionError>) {
        match command {
            Ok(command) => {
                if let Err(err) = self.router.dispatch(&command) {
                    self.reject(err);
                }
            }
            Err(err) => self.reject(err),
        }
    }

    fn require_commands(&self) -> Result<(), InteractionError> {
        if self.controller.affordances().commands {
            Ok(())
        } else {
            Err(InteractionError::Disconnected)
        }
    }

    fn on_gesture(&mut self, gesture: Gesture) {
        match gesture {
            Gesture::Command(command) => {
                let command = self.controller.submit(command);
                self.dispatch(command);
            }
            Gesture::Step => {
                let command = self.controller.step();
                self.dispatch(command);
            }
            Gesture::SetStepCount(input) => {
                if let Err(err) = self.controller.set_step_input(&input) {
                    self.reject(err);
                }
            }
            Gesture::ToggleAutoStep => match self.controller.toggle_auto_step(&self.tick_tx) {
                Ok(running) => self.emit(ViewEvent::AutoStepChanged(running)),
                Err(err) => self.reject(err),
            },
            Gesture::PointerMoved(point) => {
                if self.controller.pointer_moved(&self.scene, point) {
                    self.emit(ViewEvent::TooltipChanged(self.controller.hover().clone()));
                }
            }
            Gesture::ContextClick(point) => self.open_menu_at(point),
            Gesture::MenuChoice(action) => {
                let command = self.controller.choose(action);
                self.emit(ViewEvent::ContextMenuClosed);
                self.dispatch(command);
            }
            Gesture::CloseMenu => {
                self.controller.close_context_menu();
                self.emit(ViewEvent::ContextMenuClosed);
            }
            Gesture::CreateBuilding(request) => {
                if let Err(err) = self.require_commands() {
                    return self.reject(err);
                }
                if let Err(err) = self.router.create_building(&request) {
                    self.reject(err);
                }
            }
            Gesture::Save(filename) => {
                if let Err(err) = self.require_commands() {
                    return self.reject(err);
                }
                if let Err(err) = self.router.request_save(&filename) {
                    self.reject(err);
                }
            }
            Gesture::Load(path) => match downloads::read_state_file(&path) {
                Ok(state) => {
                    if let Err(err) = self.router.load_state(state) {
                        self.reject(err);
                    }
                }
                Err(err) => self.reject(err),
            },
            Gesture::LoadSession(id) => match self.router.load_session(id) {
                Ok(()) => {}
                Err(RouterError::Transport(TransportError::NotConnected)) => {
                    debug!(session_id = id.0, "view: session will load once connected");
                }
                Err(err) => self.reject(err),
            },
            Gesture::DismissNotification => {
                self.router.dismiss_notification();
                self.emit(ViewEvent::NotificationDismissed);
            }
            Gesture::Resize { width, height } => match self.builder.resize(width, height) {
                Ok(()) => self.rebuild_scene(),
                Err(err) => self.reject(err),
            },
            Gesture::Quit => {}
        }
    }

    fn open_menu_at(&mut self, point: Point) {
        let building = match self.scene.hit_test(point) {
            Some(HitTarget::Building(index)) => self
                .scene
                .shapes
                .get(index)
                .and_then(|shape| self.scene.buildings.get(shape.building)),
            _ => None,
        };
        match building {
            Some(building) => {
                let menu = self.controller.open_context_menu(building, point).clone();
                self.emit(ViewEvent::ContextMenuOpened(menu));
            }
            None => {
                self.controller.close_context_menu();
                self.emit(ViewEvent::ContextMenuClosed);
            }
        }
    }

    fn on_tick(&mut self, tick: u64) {
        // Ticks queued before a toggle-off or restart are dropped here.
        let Some(command) = self.controller.auto_step_command(tick) else {
            return;
        };
        if let Err(err) = self.router.dispatch(&command) {
            debug!(error = %err, "view: auto-step tick not sent");
        }
    }

    async fn shutdown(&mut self) {
        self.shutting_down = true;
        self.reconnect_at = None;
        self.controller.shutdown();
        self.router.transport_mut().close().await;
        info!("view: shut down");
    }
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
