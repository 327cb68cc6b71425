use super::*;
use serde_json::json;
use shared::protocol::{decode_session_load, decode_update};
use tokio::{task::JoinHandle, time::timeout};

use crate::{test_support::RecordingTransport, transport::Topic};

const WAIT: Duration = Duration::from_secs(60);

fn options(download_dir: PathBuf) -> ViewOptions {
    ViewOptions {
        viewport: Viewport::new(DEFAULT_CANVAS_WIDTH, DEFAULT_CANVAS_HEIGHT, 25.0),
        auto_step_period: Duration::from_secs(1),
        reconnect_delay: Duration::from_secs(5),
        download_dir,
    }
}

struct Harness {
    transport: RecordingTransport,
    events: broadcast::Receiver<ViewEvent>,
    gestures: mpsc::UnboundedSender<Gesture>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    fn start(transport: RecordingTransport, view: SimulationView<RecordingTransport>) -> Self {
        let events = view.subscribe_events();
        let (gestures, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(view.run(rx));
        Self {
            transport,
            events,
            gestures,
            task,
        }
    }

    fn send(&self, gesture: Gesture) {
        self.gestures.send(gesture).expect("view is running");
    }

    async fn wait_for<F>(&mut self, mut matches: F) -> ViewEvent
    where
        F: FnMut(&ViewEvent) -> bool,
    {
        timeout(WAIT, async {
            loop {
                let event = self.events.recv().await.expect("view event");
                if matches(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for view event")
    }

    async fn wait_connected(&mut self) {
        self.wait_for(|event| {
            matches!(
                event,
                ViewEvent::ConnectivityChanged(ConnectionState::Connected)
            )
        })
        .await;
    }

    async fn quit(self) -> RecordingTransport {
        self.send(Gesture::Quit);
        self.task.await.expect("join").expect("run");
        self.transport
    }
}

fn started(session: Option<i64>, store: Option<SessionStore>, dir: PathBuf) -> Harness {
    let transport = RecordingTransport::disconnected();
    let view = SimulationView::new(
        transport.clone(),
        session.map(SessionId),
        options(dir),
        store,
    );
    Harness::start(transport, view)
}

/// Lets the view drain everything already queued before the test goes on.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn step_commands(transport: &RecordingTransport) -> Vec<serde_json::Value> {
    transport
        .commands()
        .into_iter()
        .filter(|command| command["command"].as_str().is_some_and(|c| c.starts_with("step")))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn connecting_requests_the_known_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut harness = started(Some(42), None, dir.path().to_path_buf());
    harness.wait_connected().await;

    let transport = harness.quit().await;
    assert_eq!(
        transport.published()[0],
        (crate::transport::Destination::LoadSession, "42".to_string())
    );
    assert!(transport.was_closed());
}

#[tokio::test(start_paused = true)]
async fn auto_step_sends_current_step_count_each_period() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut harness = started(Some(42), None, dir.path().to_path_buf());
    harness.wait_connected().await;

    harness.send(Gesture::SetStepCount("3".to_string()));
    harness.send(Gesture::ToggleAutoStep);
    harness
        .wait_for(|event| matches!(event, ViewEvent::AutoStepChanged(true)))
        .await;

    tokio::time::sleep(Duration::from_millis(3500)).await;
    harness.send(Gesture::ToggleAutoStep);
    harness
        .wait_for(|event| matches!(event, ViewEvent::AutoStepChanged(false)))
        .await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    let transport = harness.quit().await;
    assert_eq!(
        step_commands(&transport),
        vec![json!({"id": 42, "command": "step 3"}); 3]
    );
}

#[tokio::test(start_paused = true)]
async fn quit_cancels_auto_step_and_closes_transport() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut harness = started(Some(7), None, dir.path().to_path_buf());
    harness.wait_connected().await;
    harness.send(Gesture::ToggleAutoStep);
    harness
        .wait_for(|event| matches!(event, ViewEvent::AutoStepChanged(true)))
        .await;

    let transport = harness.quit().await;
    assert!(transport.was_closed());
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(step_commands(&transport).is_empty());
}

#[tokio::test(start_paused = true)]
async fn reconnects_after_failure_and_after_a_drop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = RecordingTransport::disconnected();
    transport.set_fail_connect(true);
    let view = SimulationView::new(
        transport.clone(),
        Some(SessionId(3)),
        options(dir.path().to_path_buf()),
        None,
    );
    let mut harness = Harness::start(transport.clone(), view);
    let started = Instant::now();

    harness
        .wait_for(|event| {
            matches!(
                event,
                ViewEvent::ConnectivityChanged(ConnectionState::Disconnected)
            )
        })
        .await;
    transport.set_fail_connect(false);
    harness.wait_connected().await;
    assert_eq!(transport.connect_calls(), 2);
    assert!(started.elapsed() >= Duration::from_secs(5));

    transport.emit(TransportEvent::ConnectionChanged(ConnectionState::Disconnected));
    harness.wait_connected().await;
    assert_eq!(transport.connect_calls(), 3);

    harness.quit().await;
}

#[tokio::test(start_paused = true)]
async fn save_writes_the_next_successful_update() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut harness = started(Some(42), None, dir.path().to_path_buf());
    harness.wait_connected().await;

    harness.send(Gesture::Save("run1.json".to_string()));
    settle().await;
    // Foreign session first; it must not resolve the save.
    let foreign = decode_update(r#"{"id":41,"jsonData":{"cycle":1}}"#).expect("update");
    let own = decode_update(
        r#"{"id":42,"jsonData":{"cycle":2,"buildings":[{"name":"M1","mine":"iron","coordinate":[1,1]}]}}"#,
    )
    .expect("update");
    harness.transport.emit(TransportEvent::Update {
        topic: Topic::CommandResult,
        update: foreign,
    });
    harness.transport.emit(TransportEvent::Update {
        topic: Topic::CommandResult,
        update: own,
    });

    let ViewEvent::SceneUpdated(scene) = harness
        .wait_for(|event| matches!(event, ViewEvent::SceneUpdated(_)))
        .await
    else {
        unreachable!();
    };
    assert_eq!(scene.cycle, 2);
    assert_eq!(scene.buildings[0].name, "M1");

    let ViewEvent::SaveMaterialized(path) = harness
        .wait_for(|event| matches!(event, ViewEvent::SaveMaterialized(_)))
        .await
    else {
        unreachable!();
    };
    assert_eq!(path, dir.path().join("run1.json"));
    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
    assert_eq!(saved["cycle"], json!(2));

    harness.quit().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_load_file_is_rejected_inline() {
    let dir = tempfile::tempdir().expect("tempdir");
    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{ nope").expect("write");
    let mut harness = started(Some(42), None, dir.path().to_path_buf());
    harness.wait_connected().await;

    harness.send(Gesture::Load(broken));
    let event = harness
        .wait_for(|event| matches!(event, ViewEvent::Rejected(_)))
        .await;
    assert!(matches!(
        event,
        ViewEvent::Rejected(message) if message == "Error parsing JSON file. Please ensure the file is valid JSON."
    ));

    let transport = harness.quit().await;
    assert!(transport
        .published()
        .iter()
        .all(|(destination, _)| *destination != crate::transport::Destination::LoadCommand));
    assert_eq!(transport.connect_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn successful_session_load_is_persisted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SessionStore::new(dir.path());
    let mut harness = started(None, Some(SessionStore::new(dir.path())), dir.path().to_path_buf());
    harness.wait_connected().await;

    harness.send(Gesture::LoadSession(SessionId(12)));
    settle().await;
    let result = decode_session_load(
        r#"{"id":12,"status":"ok","jsonData":{"cycle":8,"buildings":[]}}"#,
    )
    .expect("result");
    harness.transport.emit(TransportEvent::SessionLoaded(result));

    harness
        .wait_for(|event| matches!(event, ViewEvent::SessionLoaded(SessionId(12))))
        .await;
    assert_eq!(store.load().expect("load"), Some(SessionId(12)));

    harness.quit().await;
}

#[tokio::test(start_paused = true)]
async fn error_updates_raise_dismissible_notifications() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut harness = started(Some(5), None, dir.path().to_path_buf());
    harness.wait_connected().await;

    let update = decode_update(r#"{"id":5,"status":"error","message":"unknown building"}"#)
        .expect("update");
    harness.transport.emit(TransportEvent::Update {
        topic: Topic::CommandResult,
        update,
    });
    let event = harness
        .wait_for(|event| matches!(event, ViewEvent::Notification(_)))
        .await;
    assert!(matches!(event, ViewEvent::Notification(message) if message == "unknown building"));

    harness.send(Gesture::DismissNotification);
    harness
        .wait_for(|event| matches!(event, ViewEvent::NotificationDismissed))
        .await;
    harness.quit().await;
}

#[tokio::test(start_paused = true)]
async fn context_click_on_a_building_opens_its_menu() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut harness = started(Some(5), None, dir.path().to_path_buf());
    harness.wait_connected().await;

    let update = decode_update(
        r#"{"id":5,"jsonData":{"buildings":[{"name":"P1","drones":[],"coordinate":[0,0]}]}}"#,
    )
    .expect("update");
    harness.transport.emit(TransportEvent::Update {
        topic: Topic::CommandResult,
        update,
    });
    harness
        .wait_for(|event| matches!(event, ViewEvent::SceneUpdated(_)))
        .await;

    harness.send(Gesture::ContextClick(Point::new(410.0, 310.0)));
    let event = harness
        .wait_for(|event| matches!(event, ViewEvent::ContextMenuOpened(_)))
        .await;
    assert!(matches!(
        event,
        ViewEvent::ContextMenuOpened(menu) if menu.building == "P1" && menu.actions.len() == 2
    ));

    harness.send(Gesture::MenuChoice(MenuAction::AddDrone));
    harness
        .wait_for(|event| matches!(event, ViewEvent::ContextMenuClosed))
        .await;
    let transport = harness.quit().await;
    assert!(transport
        .commands()
        .contains(&json!({"id": 5, "command": "add_drone at 'P1'"})));
}

#[tokio::test(start_paused = true)]
async fn commands_are_refused_while_disconnected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = RecordingTransport::disconnected();
    transport.set_fail_connect(true);
    let view = SimulationView::new(
        transport.clone(),
        Some(SessionId(1)),
        options(dir.path().to_path_buf()),
        None,
    );
    let mut harness = Harness::start(transport, view);
    harness
        .wait_for(|event| {
            matches!(
                event,
                ViewEvent::ConnectivityChanged(ConnectionState::Disconnected)
            )
        })
        .await;

    harness.send(Gesture::Command(Command::Finish));
    let event = harness
        .wait_for(|event| matches!(event, ViewEvent::Rejected(_)))
        .await;
    assert!(matches!(event, ViewEvent::Rejected(message) if message == "not connected to the simulation"));

    let transport = harness.quit().await;
    assert!(transport.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn typed_save_command_writes_the_next_update() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut harness = started(Some(42), None, dir.path().to_path_buf());
    harness.wait_connected().await;

    let command: Command = "save run2.json".parse().expect("command");
    harness.send(Gesture::Command(command));
    settle().await;
    let update = decode_update(r#"{"id":42,"jsonData":{"cycle":4}}"#).expect("update");
    harness.transport.emit(TransportEvent::Update {
        topic: Topic::CommandResult,
        update,
    });

    let ViewEvent::SaveMaterialized(path) = harness
        .wait_for(|event| matches!(event, ViewEvent::SaveMaterialized(_)))
        .await
    else {
        unreachable!();
    };
    assert_eq!(path, dir.path().join("run2.json"));
    harness.quit().await;
}

#[tokio::test(start_paused = true)]
async fn quit_does_not_wait_for_a_stalled_connect() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = RecordingTransport::disconnected();
    transport.set_stall_connect(true);
    let view = SimulationView::new(
        transport.clone(),
        Some(SessionId(42)),
        options(dir.path().to_path_buf()),
        None,
    );
    let mut harness = Harness::start(transport, view);
    harness
        .wait_for(|event| {
            matches!(
                event,
                ViewEvent::ConnectivityChanged(ConnectionState::Connecting)
            )
        })
        .await;

    harness.send(Gesture::SetStepCount("4".to_string()));
    harness.send(Gesture::Step);
    harness
        .wait_for(|event| matches!(event, ViewEvent::Rejected(_)))
        .await;

    let transport = timeout(Duration::from_secs(1), harness.quit())
        .await
        .expect("quit waited on the connect attempt");
    assert!(transport.was_closed());
    assert_eq!(transport.connect_calls(), 1);
}

#[tokio::test]
async fn quit_cancels_a_handshake_the_broker_never_answers() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    let url = crate::config::normalize_broker_url(&format!("http://{addr}/api/ws-command"))
        .expect("url");

    let dir = tempfile::tempdir().expect("tempdir");
    let view = SimulationView::new(
        crate::transport::TransportClient::new(url, Duration::from_secs(10)),
        Some(SessionId(42)),
        options(dir.path().to_path_buf()),
        None,
    );
    let mut events = view.subscribe_events();
    let (gestures, rx) = mpsc::unbounded_channel();
    let started = Instant::now();
    let task = tokio::spawn(view.run(rx));

    timeout(WAIT, async {
        while !matches!(
            events.recv().await.expect("view event"),
            ViewEvent::ConnectivityChanged(ConnectionState::Connecting)
        ) {}
    })
    .await
    .expect("connecting");
    tokio::time::sleep(Duration::from_millis(100)).await;
    gestures.send(Gesture::Quit).expect("view is running");

    timeout(Duration::from_secs(2), task)
        .await
        .expect("quit waited on the handshake")
        .expect("join")
        .expect("run");
    assert!(started.elapsed() < Duration::from_secs(5));
    silent.abort();
}
