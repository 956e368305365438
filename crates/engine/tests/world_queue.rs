//! World queue and registry correctness: serial execution, attach/detach
//! ownership transfer, and the player index.

use std::sync::{Arc, Mutex};

use uuid::Uuid;
use waystone_engine::transform::Transform;
use waystone_engine::world::{AttachError, DetachError, PlayerBody, WorldEvent, WorldRegistry};

fn body(id: Uuid, x: f64, y: f64, z: f64) -> PlayerBody {
    PlayerBody { id, transform: Transform::at(x, y, z) }
}

// ---------------------------------------------------------------------------
// Queue semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn jobs_run_in_submission_order() {
    let registry = WorldRegistry::new();
    let world = registry.create_world("overworld");

    let seen = Arc::new(Mutex::new(Vec::new()));
    for i in 0..100 {
        let seen = Arc::clone(&seen);
        world
            .submit(move |_state| seen.lock().unwrap().push(i))
            .unwrap();
    }
    // `run` queues behind all prior submits, so awaiting it is a barrier.
    world.run(|_state| ()).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(*seen, (0..100).collect::<Vec<_>>());
}

#[tokio::test]
async fn run_returns_job_result() {
    let registry = WorldRegistry::new();
    let world = registry.create_world("overworld");

    let count = world.run(|state| state.player_count()).await.unwrap();
    assert_eq!(count, 0);
    assert_eq!(world.name(), "overworld");
}

// ---------------------------------------------------------------------------
// Attach / detach
// ---------------------------------------------------------------------------

#[tokio::test]
async fn attach_then_read_transform() {
    let registry = WorldRegistry::new();
    let world = registry.create_world("overworld");
    let id = Uuid::new_v4();

    world.attach(body(id, 10.0, 64.0, 10.0)).await.unwrap();

    let transform = world.transform_of(id).await.unwrap().unwrap();
    assert_eq!(transform, Transform::at(10.0, 64.0, 10.0));
    assert_eq!(registry.world_name_of(id).as_deref(), Some("overworld"));
}

#[tokio::test]
async fn duplicate_attach_is_rejected() {
    let registry = WorldRegistry::new();
    let world = registry.create_world("overworld");
    let id = Uuid::new_v4();

    world.attach(body(id, 0.0, 0.0, 0.0)).await.unwrap();
    let err = world.attach(body(id, 1.0, 1.0, 1.0)).await.unwrap_err();
    assert!(matches!(err, AttachError::AlreadyAttached(p) if p == id));

    // The original body is untouched.
    let transform = world.transform_of(id).await.unwrap().unwrap();
    assert_eq!(transform, Transform::at(0.0, 0.0, 0.0));
}

#[tokio::test]
async fn closed_world_rejects_attach() {
    let registry = WorldRegistry::new();
    let world = registry.create_world("overworld");
    world.set_accepting(false).await.unwrap();

    let err = world.attach(body(Uuid::new_v4(), 0.0, 0.0, 0.0)).await.unwrap_err();
    assert!(matches!(err, AttachError::NotAccepting(name) if name == "overworld"));
}

#[tokio::test]
async fn detach_moves_body_out_and_clears_index() {
    let registry = WorldRegistry::new();
    let world = registry.create_world("overworld");
    let id = Uuid::new_v4();

    world.attach(body(id, 5.0, 70.0, 5.0)).await.unwrap();
    let detached = world.detach(id).await.unwrap();
    assert_eq!(detached.transform, Transform::at(5.0, 70.0, 5.0));

    assert!(world.transform_of(id).await.unwrap().is_none());
    assert!(registry.world_name_of(id).is_none());

    let err = world.detach(id).await.unwrap_err();
    assert!(matches!(err, DetachError::NotAttached(p) if p == id));
}

#[tokio::test]
async fn cross_world_transfer_updates_index() {
    let registry = WorldRegistry::new();
    let w1 = registry.create_world("w1");
    let w2 = registry.create_world("w2");
    let id = Uuid::new_v4();

    w1.attach(body(id, 0.0, 64.0, 0.0)).await.unwrap();
    let moved = w1.detach(id).await.unwrap();
    w2.attach(moved).await.unwrap();

    assert_eq!(registry.world_name_of(id).as_deref(), Some("w2"));
    assert_eq!(registry.world_of(id).unwrap().name(), "w2");
    assert!(w1.transform_of(id).await.unwrap().is_none());
    assert!(w2.transform_of(id).await.unwrap().is_some());
}

#[tokio::test]
async fn apply_transform_requires_attachment() {
    let registry = WorldRegistry::new();
    let world = registry.create_world("overworld");
    let id = Uuid::new_v4();

    assert!(!world.apply_transform(id, Transform::at(1.0, 2.0, 3.0)).await.unwrap());

    world.attach(body(id, 0.0, 0.0, 0.0)).await.unwrap();
    assert!(world.apply_transform(id, Transform::new(1.0, 2.0, 3.0, 90.0, 0.0)).await.unwrap());
    let transform = world.transform_of(id).await.unwrap().unwrap();
    assert_eq!(transform, Transform::new(1.0, 2.0, 3.0, 90.0, 0.0));
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lifecycle_events_are_broadcast_in_order() {
    let registry = WorldRegistry::new();
    let world = registry.create_world("overworld");
    let mut events = registry.subscribe();
    let id = Uuid::new_v4();

    world.attach(body(id, 0.0, 64.0, 0.0)).await.unwrap();
    world.apply_transform(id, Transform::at(1.0, 64.0, 0.0)).await.unwrap();
    world.detach(id).await.unwrap();

    match events.recv().await.unwrap() {
        WorldEvent::Attached { world, id: got, .. } => {
            assert_eq!(world, "overworld");
            assert_eq!(got, id);
        }
        other => panic!("expected Attached, got {other:?}"),
    }
    match events.recv().await.unwrap() {
        WorldEvent::Moved { transform, .. } => assert_eq!(transform, Transform::at(1.0, 64.0, 0.0)),
        other => panic!("expected Moved, got {other:?}"),
    }
    assert!(matches!(events.recv().await.unwrap(), WorldEvent::Detached { .. }));
}

#[tokio::test]
async fn distance_ignores_rotation() {
    let a = Transform::new(0.0, 0.0, 0.0, 0.0, 0.0);
    let b = Transform::new(3.0, 4.0, 0.0, 180.0, -45.0);
    assert!((a.distance_to(&b) - 5.0).abs() < 1e-9);
}
