//! Event bus behavior: replay on subscribe, teardown on unsubscribe, and
//! reconstruction of an environment from a recorded binary event stream.

use kshetra_env::core::Transform;
use kshetra_env::event::EventLog;
use kshetra_env::maps::{ElevationGrid, MlsGrid};
use kshetra_env::operators::GridToMls;
use kshetra_env::{
    BinaryEventRecorder, Environment, Error, FrameNode, ItemId, Layer,
};

fn build_scene(env: &mut Environment) -> (ItemId, ItemId, ItemId, ItemId) {
    let root = env.root_frame().clone();
    let frame = env
        .attach(
            FrameNode::with_transform("f/", Transform::from_translation([1.0, 0.0, 0.0])).into(),
        )
        .unwrap();
    env.add_frame_child(&root, &frame).unwrap();
    let grid = env
        .attach_map(
            Layer::with_map("grid/", Box::new(ElevationGrid::centered(4, 4, 0.5))),
            Some(&frame),
        )
        .unwrap();
    let mls = env
        .attach_map(
            Layer::with_map("mls/", Box::new(MlsGrid::new(0, 0, 0.1, [0.0, 0.0]))),
            None,
        )
        .unwrap();
    let op = env
        .attach(GridToMls::default().into_node("op/").into())
        .unwrap();
    env.set_input(&op, &grid).unwrap();
    env.set_output(&op, &mls).unwrap();
    (frame, grid, mls, op)
}

#[test]
fn test_subscribe_replays_one_add_per_item_and_edge() {
    let mut env = Environment::new();
    build_scene(&mut env);

    let log = EventLog::new();
    env.add_event_handler(Box::new(log.clone()));
    let entries = log.entries();

    let item_count = env.items().count();
    let adds: Vec<&String> = entries.iter().filter(|e| e.starts_with("add ")).collect();
    assert_eq!(adds.len(), item_count);

    // one frame tree edge, two attachments, one input, one output
    assert_eq!(
        entries.iter().filter(|e| e.starts_with("frame-edge ")).count(),
        1
    );
    assert_eq!(
        entries.iter().filter(|e| e.starts_with("attach ")).count(),
        2
    );
    assert_eq!(
        entries.iter().filter(|e| e.starts_with("op-input ")).count(),
        1
    );
    assert_eq!(
        entries.iter().filter(|e| e.starts_with("op-output ")).count(),
        1
    );
}

#[test]
fn test_replay_delivers_parents_before_children() {
    let mut env = Environment::new();
    let (frame, grid, _mls, op) = build_scene(&mut env);

    let log = EventLog::new();
    env.add_event_handler(Box::new(log.clone()));
    let entries = log.entries();

    let pos = |needle: String| {
        entries
            .iter()
            .position(|e| *e == needle)
            .expect("expected replay entry")
    };
    let root = env.root_frame().clone();
    // the root frame precedes its child, the child precedes the map
    // attached to it, layers precede the operator wiring
    assert!(pos(format!("add {}", root)) < pos(format!("add {}", frame)));
    assert!(pos(format!("add {}", frame)) < pos(format!("attach {} @ {}", grid, frame)));
    assert!(pos(format!("add {}", grid)) < pos(format!("op-input {} -> {}", op, grid)));
    assert!(pos(format!("add {}", op)) > pos(format!("add {}", grid)));
}

#[test]
fn test_unsubscribe_tears_down_to_empty() {
    let mut env = Environment::new();
    build_scene(&mut env);

    let log = EventLog::new();
    let handle = env.add_event_handler(Box::new(log.clone()));
    let seen_on_subscribe = log.entries().len();

    let handler = env.remove_event_handler(handle);
    assert!(handler.is_some());
    let entries = log.entries();
    // the teardown mirrors the replay, event for event
    assert_eq!(entries.len(), seen_on_subscribe * 2);
    let removes = entries
        .iter()
        .skip(seen_on_subscribe)
        .filter(|e| e.starts_with("remove "))
        .count();
    assert_eq!(removes, env.items().count());

    // unknown handles are rejected quietly
    assert!(env.remove_event_handler(handle).is_none());
}

#[test]
fn test_recorded_stream_rebuilds_equivalent_environment() {
    let mut env = Environment::new();
    let recorder = BinaryEventRecorder::new();
    env.add_event_handler(Box::new(recorder.clone()));

    let (frame, grid, mls, op) = build_scene(&mut env);
    env.set_transform(&frame, Transform::from_translation([0.0, 2.0, 0.0]))
        .unwrap();

    let mut rebuilt = Environment::new();
    rebuilt.apply_events(&recorder.events()).unwrap();

    assert_eq!(
        env.item_ids().collect::<std::collections::BTreeSet<_>>(),
        rebuilt.item_ids().collect::<std::collections::BTreeSet<_>>()
    );
    assert_eq!(rebuilt.frame_parent_of(&frame), env.frame_parent_of(&frame));
    assert_eq!(rebuilt.frame_of_map(&grid), Some(&frame));
    assert_eq!(rebuilt.generator_of(&mls), Some(&op));
    let t = rebuilt.transform_of(&frame).unwrap();
    assert_eq!(t.transform.translation, [0.0, 2.0, 0.0]);
    // the output became generated during replay, so it is dirty
    assert!(rebuilt.layer(&mls).unwrap().is_dirty());
}

#[test]
fn test_replay_restores_root_label_and_transform() {
    let mut env = Environment::new();
    let root = env.root_frame().clone();
    env.set_label(&root, "world origin").unwrap();
    env.set_transform(&root, Transform::from_translation([0.0, 0.0, 0.5]))
        .unwrap();

    let recorder = BinaryEventRecorder::new();
    env.add_event_handler(Box::new(recorder.clone()));

    let mut rebuilt = Environment::new();
    rebuilt.apply_events(&recorder.events()).unwrap();

    let rebuilt_root = rebuilt.get(&root).unwrap();
    assert_eq!(rebuilt_root.label(), "world origin");
    let t = rebuilt.transform_of(&root).unwrap();
    assert_eq!(t.transform.translation, [0.0, 0.0, 0.5]);
}

#[test]
fn test_stream_roundtrips_through_bytes() {
    let mut env = Environment::new();
    let recorder = BinaryEventRecorder::new();
    env.add_event_handler(Box::new(recorder.clone()));
    build_scene(&mut env);

    let mut buf = Vec::new();
    kshetra_env::event::binary::write_event_stream(&mut buf, &recorder.events()).unwrap();
    let events = kshetra_env::event::binary::read_event_stream(&mut buf.as_slice()).unwrap();
    assert_eq!(events, recorder.events());

    let mut rebuilt = Environment::new();
    rebuilt.apply_events(&events).unwrap();
    assert_eq!(env.items().count(), rebuilt.items().count());
}

#[test]
fn test_replay_onto_conflicting_environment_fails() {
    let mut env = Environment::new();
    let recorder = BinaryEventRecorder::new();
    env.add_event_handler(Box::new(recorder.clone()));
    let (_frame, grid, _mls, _op) = build_scene(&mut env);

    let mut target = Environment::new();
    // occupy one of the recorded ids
    target.attach(Layer::new(grid.as_str()).into()).unwrap();
    let err = target.apply_events(&recorder.events()).unwrap_err();
    assert!(matches!(err, Error::ReplayConflict { .. }));
}

#[test]
fn test_detach_emits_edge_removals_before_item_removal() {
    let mut env = Environment::new();
    let (_frame, grid, _mls, op) = build_scene(&mut env);
    env.remove_input(&op, &grid).unwrap();
    env.remove_outputs(&op).unwrap();

    let log = EventLog::new();
    env.add_event_handler(Box::new(log.clone()));
    let before = log.entries().len();

    env.detach(&op).unwrap();
    let entries = log.entries();
    let tail: Vec<&String> = entries.iter().skip(before).collect();
    assert_eq!(*tail.last().unwrap(), &format!("remove {}", op));
}
