use std::{io::Write, path::PathBuf, sync::Arc};

use anyhow::{bail, Result};
use clap::Parser;
use client_core::{
    config::normalize_broker_url, load_settings, load_settings_from, parse_pin, parse_route,
    ConnectionState, Scene, SessionStore, SimulationView, TransportClient, ViewEvent, ViewOptions,
};
use shared::domain::SessionId;
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines, Stdin},
    sync::{broadcast, mpsc, watch},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod input;

use input::{parse_line, Input, HELP};

const STATE_DIR_NAME: &str = ".sim_viewer";

#[derive(Parser, Debug)]
struct Args {
    /// Broker endpoint; http(s) URLs are rewritten to the websocket sub-path.
    #[arg(long)]
    broker_url: Option<String>,
    /// Session pin to open.
    #[arg(long)]
    session: Option<String>,
    /// Navigation path naming the session, e.g. `/42`.
    #[arg(long, conflicts_with = "session")]
    route: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => load_settings_from(Some(path.as_path()))?,
        None => load_settings()?,
    };
    if let Some(url) = args.broker_url.clone() {
        settings.broker_url = url;
    }
    let store = settings
        .state_dir
        .clone()
        .or_else(|| dirs::home_dir().map(|home| home.join(STATE_DIR_NAME)))
        .map(SessionStore::new);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let session = resolve_session(&args, store.as_ref(), &mut lines).await?;
    let url = normalize_broker_url(&settings.broker_url)?;
    info!(%url, session_id = session.0, "viewer: starting");

    let transport = TransportClient::new(url, settings.connect_timeout);
    let view = SimulationView::new(
        transport,
        Some(session),
        ViewOptions::from_settings(&settings),
        store,
    );
    let (scene_tx, scene_rx) = watch::channel(view.scene());
    let printer = tokio::spawn(print_events(view.subscribe_events(), scene_tx));
    let (gestures, gesture_rx) = mpsc::unbounded_channel();
    let view_task = tokio::spawn(view.run(gesture_rx));

    println!("{HELP}");
    while let Some(line) = lines.next_line().await? {
        let scene = Arc::clone(&scene_rx.borrow());
        match parse_line(&line, &scene) {
            Ok(None) => {}
            Ok(Some(Input::Help)) => println!("{HELP}"),
            Ok(Some(Input::ListBuildings)) => print_panel(&scene),
            Ok(Some(Input::Gesture(gesture))) => {
                let quit = gesture == client_core::Gesture::Quit;
                if gestures.send(gesture).is_err() || quit {
                    break;
                }
            }
            Err(err) => eprintln!("error: {err:#}"),
        }
    }

    drop(gestures);
    view_task.await??;
    printer.abort();
    Ok(())
}

async fn resolve_session(
    args: &Args,
    store: Option<&SessionStore>,
    lines: &mut Lines<BufReader<Stdin>>,
) -> Result<SessionId> {
    if let Some(route) = &args.route {
        return Ok(parse_route(route)?);
    }
    if let Some(pin) = &args.session {
        return Ok(parse_pin(pin)?);
    }

    let last = match store.map(SessionStore::load).transpose() {
        Ok(last) => last.flatten(),
        Err(err) => {
            warn!(error = %err, "viewer: ignoring unreadable session store");
            None
        }
    };
    loop {
        match last {
            Some(id) => print!("Session PIN [{id}]: "),
            None => print!("Session PIN: "),
        }
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            bail!("stdin closed before a session was chosen");
        };
        if line.trim().is_empty() {
            if let Some(id) = last {
                return Ok(id);
            }
            continue;
        }
        match parse_pin(&line) {
            Ok(id) => return Ok(id),
            Err(err) => eprintln!("{err}"),
        }
    }
}

async fn print_events(mut events: broadcast::Receiver<ViewEvent>, scene_tx: watch::Sender<Arc<Scene>>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "viewer: dropped view events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            ViewEvent::ConnectivityChanged(state) => println!(
                "[{}]",
                match state {
                    ConnectionState::Connected => "connected",
                    ConnectionState::Connecting => "connecting",
                    ConnectionState::Disconnected => "disconnected",
                }
            ),
            ViewEvent::SceneUpdated(scene) => {
                println!(
                    "cycle {}: {} buildings, {} roads, {} drones, {} deliveries",
                    scene.cycle,
                    scene.buildings.len(),
                    scene.roads.len(),
                    scene.drones.len(),
                    scene.deliveries.len()
                );
                let _ = scene_tx.send(scene);
            }
            ViewEvent::Notification(message) => println!("! {message} (:dismiss)"),
            ViewEvent::NotificationDismissed => {}
            ViewEvent::SaveMaterialized(path) => println!("saved {}", path.display()),
            ViewEvent::SessionLoaded(id) => println!("session {id} loaded"),
            ViewEvent::TooltipChanged(hover) if hover.visible => println!("{}", hover.text),
            ViewEvent::TooltipChanged(_) => {}
            ViewEvent::ContextMenuOpened(menu) => {
                let actions: Vec<&str> = menu
                    .actions
                    .iter()
                    .map(|action| match action {
                        client_core::MenuAction::AddDrone => "add-drone",
                        client_core::MenuAction::Remove => "remove",
                    })
                    .collect();
                println!("{}: :pick {}", menu.building, actions.join("|"));
            }
            ViewEvent::ContextMenuClosed => {}
            ViewEvent::AutoStepChanged(running) => {
                println!("auto-step {}", if running { "on" } else { "off" })
            }
            ViewEvent::Rejected(message) => eprintln!("error: {message}"),
        }
    }
}

fn print_panel(scene: &Scene) {
    if scene.buildings.is_empty() {
        println!("no buildings");
        return;
    }
    for section in scene.panel() {
        println!("{}", section.title);
        for entry in section.entries {
            println!("  {entry}");
        }
    }
}
