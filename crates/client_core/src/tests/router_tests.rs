use super::*;
use serde_json::json;
use shared::{
    domain::GridCoord,
    protocol::{decode_session_load, decode_update, BuildingSpec},
};

use crate::test_support::RecordingTransport;

fn router(session: Option<i64>) -> (SessionCommandRouter<RecordingTransport>, RecordingTransport) {
    let transport = RecordingTransport::connected();
    let router = SessionCommandRouter::new(transport.clone(), session.map(SessionId));
    (router, transport)
}

fn update(value: serde_json::Value) -> Update {
    decode_update(&value.to_string()).expect("update")
}

fn ok_update(id: i64, cycle: u64) -> Update {
    update(json!({"id": id, "jsonData": {"cycle": cycle, "buildings": [{"name": "M1", "mine": "iron"}]}}))
}

#[test]
fn dispatch_stamps_active_session() {
    let (mut router, transport) = router(Some(42));
    router.dispatch(&Command::Finish).expect("dispatch");

    assert_eq!(
        transport.published(),
        vec![(
            Destination::Command,
            r#"{"id":42,"command":"finish"}"#.to_string()
        )]
    );
}

#[test]
fn dispatch_without_session_is_rejected() {
    let (mut router, transport) = router(None);
    assert!(matches!(
        router.dispatch(&Command::Step(1)),
        Err(RouterError::NoSession)
    ));
    assert!(transport.published().is_empty());
}

#[test]
fn dispatch_while_disconnected_is_a_safe_no_op() {
    let transport = RecordingTransport::disconnected();
    let mut router = SessionCommandRouter::new(transport.clone(), Some(SessionId(1)));
    assert!(matches!(
        router.dispatch(&Command::Finish),
        Err(RouterError::Transport(TransportError::NotConnected))
    ));
    assert!(transport.published().is_empty());
}

#[test]
fn dispatch_validates_arguments_before_publishing() {
    let (mut router, transport) = router(Some(1));
    assert!(matches!(
        router.dispatch(&Command::Step(0)),
        Err(RouterError::Command(CommandError::NonPositiveStep))
    ));
    assert!(transport.published().is_empty());
}

#[test]
fn foreign_session_update_changes_nothing() {
    let (mut router, _) = router(Some(42));
    router.on_update(ok_update(42, 3));
    router.request_save("run1.json").expect("save");
    let before = router.state().clone();

    let outcome = router.on_update(update(json!({"id": 41, "jsonData": {"cycle": 99, "buildings": []}})));
    assert_eq!(
        outcome,
        UpdateOutcome::Ignored {
            received: SessionId(41)
        }
    );
    let outcome = router.on_update(update(json!({"id": 41, "status": "error", "message": "boom"})));
    assert!(matches!(outcome, UpdateOutcome::Ignored { .. }));
    assert_eq!(router.state(), &before);
}

#[test]
fn pending_save_survives_errors_and_resolves_once() {
    let (mut router, transport) = router(Some(42));
    router.request_save("run1.json").expect("save");
    assert_eq!(
        transport.commands(),
        vec![json!({"id": 42, "command": "save run1.json"})]
    );
    assert_eq!(router.state().pending_save.as_deref(), Some("run1.json"));

    let outcome = router.on_update(update(json!({"id": 42, "jsonData": {"status": "error", "details": "disk full"}})));
    assert_eq!(
        outcome,
        UpdateOutcome::Failed {
            message: "disk full".to_string()
        }
    );
    assert_eq!(router.state().notification.as_deref(), Some("disk full"));
    assert_eq!(router.state().pending_save.as_deref(), Some("run1.json"));

    let outcome = router.on_update(ok_update(42, 5));
    let UpdateOutcome::Applied { save: Some(artifact) } = outcome else {
        panic!("expected a save artifact, got {outcome:?}");
    };
    assert_eq!(artifact.filename, "run1.json");
    assert_eq!(artifact.payload["cycle"], json!(5));
    assert_eq!(router.state().pending_save, None);

    assert_eq!(
        router.on_update(ok_update(42, 6)),
        UpdateOutcome::Applied { save: None }
    );
}

#[test]
fn typed_save_command_materializes_the_next_update() {
    let (mut router, transport) = router(Some(42));
    let command: Command = "save run1.json".parse().expect("command");
    router.dispatch(&command).expect("dispatch");
    assert_eq!(
        transport.commands(),
        vec![json!({"id": 42, "command": "save run1.json"})]
    );

    let UpdateOutcome::Applied { save: Some(artifact) } = router.on_update(ok_update(42, 5)) else {
        panic!("save was not resolved");
    };
    assert_eq!(artifact.filename, "run1.json");
    assert_eq!(artifact.payload["cycle"], json!(5));
    assert_eq!(router.state().pending_save, None);
}

#[test]
fn failed_save_publish_leaves_nothing_pending() {
    let transport = RecordingTransport::disconnected();
    let mut router = SessionCommandRouter::new(transport, Some(SessionId(42)));
    assert!(router.request_save("run1.json").is_err());
    assert_eq!(router.state().pending_save, None);
}

#[test]
fn merge_keeps_fields_the_update_omits() {
    let (mut router, _) = router(Some(7));
    router.on_update(update(json!({
        "id": 7,
        "jsonData": {"cycle": 2, "buildings": [{"name": "M1", "mine": "iron"}], "roads": [{"coordinate": [0, 1], "direction": [0, 1]}]}
    })));
    router.on_update(update(json!({"id": 7, "cycle": 3})));

    let state = router.state();
    assert_eq!(state.cycle, 3);
    assert_eq!(state.buildings.len(), 1);
    assert_eq!(state.roads.len(), 1);
}

#[test]
fn load_session_switches_before_publishing() {
    let transport = RecordingTransport::disconnected();
    let mut router = SessionCommandRouter::new(transport.clone(), Some(SessionId(1)));
    assert!(router.load_session(SessionId(9)).is_err());
    assert_eq!(router.session_id(), Some(SessionId(9)));

    let (mut router, transport) = self::router(Some(1));
    router.load_session(SessionId(9)).expect("load");
    assert_eq!(
        transport.published(),
        vec![(Destination::LoadSession, "9".to_string())]
    );
}

#[test]
fn session_load_replaces_state_wholesale() {
    let (mut router, _) = router(Some(9));
    router.on_update(update(json!({"id": 9, "jsonData": {"cycle": 4, "roads": [{"coordinate": [0, 0]}]}})));

    let result = decode_session_load(r#"{"status":"ok","jsonData":{"buildings":[{"name":"S1","stores":"door"}]}}"#)
        .expect("result");
    assert_eq!(
        router.on_session_loaded(result),
        SessionLoadOutcome::Loaded { id: SessionId(9) }
    );
    let state = router.state();
    assert_eq!(state.cycle, 0);
    assert!(state.roads.is_empty());
    assert_eq!(state.buildings[0].name, "S1");
}

#[test]
fn session_load_for_another_session_is_ignored() {
    let (mut router, _) = router(Some(9));
    let result = decode_session_load(r#"{"id":8,"status":"ok","jsonData":{"cycle":4}}"#).expect("result");
    assert_eq!(router.on_session_loaded(result), SessionLoadOutcome::Ignored);
    assert_eq!(router.state().cycle, 0);
}

#[test]
fn session_load_error_raises_notification() {
    let (mut router, _) = router(Some(9));
    let result = decode_session_load(r#"{"status":"error","message":"Session not found"}"#).expect("result");
    assert_eq!(
        router.on_session_loaded(result),
        SessionLoadOutcome::Failed {
            message: "Session not found".to_string()
        }
    );
    assert_eq!(router.state().notification.as_deref(), Some("Session not found"));
    router.dismiss_notification();
    assert_eq!(router.state().notification, None);
}

#[test]
fn create_building_and_load_state_use_json_data_envelope() {
    let (router, transport) = router(Some(3));
    router
        .create_building(&NewBuildingRequest {
            name: "P1".to_string(),
            coordinate: GridCoord::new(2, -1),
            spec: BuildingSpec::DronePort {
                initial_drone_count: 4,
            },
        })
        .expect("create");
    router
        .load_state(json!({"cycle": 1, "buildings": []}))
        .expect("load");

    let published = transport.published();
    assert_eq!(published[0].0, Destination::NewBuilding);
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&published[0].1).expect("json"),
        json!({"id": 3, "jsonData": {"type": "drone port", "name": "P1", "info": {"coordinate": [2, -1], "initialDroneCount": 4}}})
    );
    assert_eq!(published[1].0, Destination::LoadCommand);
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&published[1].1).expect("json"),
        json!({"id": 3, "jsonData": {"cycle": 1, "buildings": []}})
    );
}
