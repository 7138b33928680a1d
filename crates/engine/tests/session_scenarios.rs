use std::time::Duration;

use flowsim_engine::protocol::LoopbackHandle;
use flowsim_engine::{
    Connection, ConnectionState, EntityId, Handshake, HeadlessPresenter, InputSnapshot,
    LoopbackTransport, ModeKind, Session, VisualRole,
};
use serde_json::json;

const TICK: Duration = Duration::from_millis(16);

fn connected_session(
    kind: ModeKind,
    handshake: Handshake,
) -> (Session<HeadlessPresenter>, LoopbackHandle) {
    let (transport, server) = LoopbackTransport::pair();
    let connection = Connection::new(Box::new(transport), handshake);
    let mut session = Session::new(kind.build(42), HeadlessPresenter::new(), connection);
    session.connect().expect("connect");
    server.open();
    (session, server)
}

fn run_ticks(session: &mut Session<HeadlessPresenter>, ticks: usize) {
    for _ in 0..ticks {
        session.tick(&InputSnapshot::empty(), TICK);
    }
}

#[test]
fn handshake_uses_default_timeout_when_unset_or_invalid() {
    for timeout in [None, Some(0.0), Some(f64::NAN), Some(-3.0)] {
        let (mut session, server) =
            connected_session(ModeKind::Space, Handshake::new(timeout, None, None));
        run_ticks(&mut session, 1);

        assert_eq!(
            server.take_sent(),
            vec![r#"{"timeout":20000,"workflowNames":null}"#.to_string()]
        );
    }
}

#[test]
fn handshake_carries_configured_fields() {
    let handshake = Handshake::new(Some(1.5), Some(true), Some("Policy,Claims".to_string()));
    let (mut session, server) = connected_session(ModeKind::Fps, handshake);
    run_ticks(&mut session, 3);

    assert_eq!(
        server.take_sent(),
        vec![r#"{"timeout":1500,"included":true,"workflowNames":"Policy,Claims"}"#.to_string()]
    );
    assert_eq!(session.connection().state(), ConnectionState::Open);
}

#[test]
fn activity_id_can_be_reused_after_removal() {
    for kind in [ModeKind::Space, ModeKind::Fps] {
        let (mut session, server) = connected_session(kind, Handshake::new(None, None, None));
        server.push_json(&json!({ "activity": { "id": "a1", "name": "Review" } }));
        server.push_json(&json!({ "activityStarted": { "id": "a1" } }));
        server.push_json(&json!({ "activity": { "id": "a1", "name": "Review" } }));
        run_ticks(&mut session, 1);

        let registry = session.registry();
        assert_eq!(registry.live_count(), 1, "mode {kind}");
        assert!(registry.contains(&EntityId::from("a1")));
        assert_eq!(registry.spawn_counter(), 2);
    }
}

#[test]
fn duplicate_live_activity_is_rejected() {
    let (mut session, server) = connected_session(ModeKind::Space, Handshake::new(None, None, None));
    server.push_json(&json!({ "activity": { "id": "a1" } }));
    server.push_json(&json!({ "activity": { "id": "a1" } }));
    run_ticks(&mut session, 1);

    assert_eq!(session.registry().live_count(), 1);
    assert_eq!(session.presenter().count_role(VisualRole::Rock), 1);
}

#[test]
fn repeated_removal_triggers_one_effect() {
    let (mut session, server) = connected_session(ModeKind::Space, Handshake::new(None, None, None));
    server.push_json(&json!({ "activity": { "id": "a1" } }));
    server.push_json(&json!({ "activityStarted": { "id": "a1" } }));
    server.push_json(&json!({ "activityStarted": { "id": "a1" } }));
    run_ticks(&mut session, 1);

    assert_eq!(session.registry().live_count(), 0);
    assert_eq!(session.effects().explosions.len(), 1);
}

#[test]
fn malformed_and_unknown_frames_do_not_disturb_the_session() {
    let (mut session, server) = connected_session(ModeKind::Fps, Handshake::new(None, None, None));
    server.push_text("{not json");
    server.push_json(&json!({ "leaderboard": [1, 2, 3] }));
    server.push_json(&json!({ "activity": { "id": "a7" } }));
    run_ticks(&mut session, 1);

    assert!(session.registry().contains(&EntityId::from("a7")));
    assert_eq!(session.stats().unknown_messages, 1);
}

#[test]
fn fps_stage_opens_door_and_retires_stage_entity() {
    let (mut session, server) = connected_session(ModeKind::Fps, Handshake::new(None, None, None));
    server.push_json(&json!({ "stage": { "id": "s1", "name": "Approval" } }));
    run_ticks(&mut session, 1);
    server.take_sent();

    assert!(session.registry().contains(&EntityId::from("s1")));
    assert_eq!(session.presenter().count_role(VisualRole::Platform), 2);
    assert_eq!(session.presenter().count_role(VisualRole::Door), 2);
    assert_eq!(session.presenter().count_role(VisualRole::Switch), 1);

    server.push_json(&json!({ "stageEntered": { "id": "s1" } }));
    // The door needs (4 + 5) / 4 seconds to clear the doorway.
    run_ticks(&mut session, 160);
    assert!(!session.registry().contains(&EntityId::from("s1")));
    assert_eq!(session.presenter().count_role(VisualRole::Door), 2);

    // ... and 29 / 4 seconds to come to rest, where it is removed.
    run_ticks(&mut session, 320);
    assert_eq!(session.presenter().count_role(VisualRole::Door), 1);
    assert!(server.take_sent().is_empty());
}

#[test]
fn fps_stage_entered_twice_is_harmless() {
    let (mut session, server) = connected_session(ModeKind::Fps, Handshake::new(None, None, None));
    server.push_json(&json!({ "stage": { "id": "s1" } }));
    server.push_json(&json!({ "stage": { "id": "s2" } }));
    server.push_json(&json!({ "stageEntered": { "id": "s1" } }));
    server.push_json(&json!({ "stageEntered": { "id": "s1" } }));
    server.push_json(&json!({ "stageEntered": { "id": "ghost" } }));
    run_ticks(&mut session, 200);

    assert!(!session.registry().contains(&EntityId::from("s1")));
    assert!(session.registry().contains(&EntityId::from("s2")));
}

#[test]
fn messages_after_close_are_dropped() {
    let (mut session, server) = connected_session(ModeKind::Space, Handshake::new(None, None, None));
    run_ticks(&mut session, 1);
    server.close();
    server.push_json(&json!({ "activity": { "id": "late" } }));
    run_ticks(&mut session, 1);

    assert_eq!(session.connection().state(), ConnectionState::Closed);
    assert_eq!(session.registry().live_count(), 0);
    assert_eq!(session.connection().stats().dropped_inbound, 1);
}
