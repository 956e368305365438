//! Handoff behavior: same-world transform writes, two-phase cross-world
//! transfers, attach-failure recovery, and cross-server intents.

mod common;

use common::{Proc, completion, dest, settle};
use waystone_engine::transform::Transform;
use waystone_engine::world::WorldEvent;
use waystone_server::broker::{Broker, MemoryBroker};
use waystone_server::location::ServerLocation;
use waystone_server::protocol::{ChannelMessage, TOPIC_TELEPORT};
use waystone_server::warmup::{FailureReason, TeleportOutcome};

const START: Transform = Transform { x: 10.0, y: 64.0, z: 10.0, yaw: 0.0, pitch: 0.0 };

#[tokio::test(start_paused = true)]
async fn same_world_handoff_applies_exact_transform() {
    let proc = Proc::start("alpha", &["overworld"], MemoryBroker::new()).await;
    let id = proc.join("Steve", "overworld", START).await;

    let destination = ServerLocation::new("alpha", "overworld", 50.0, 64.0, 50.0, 90.0, 0.0);
    let (on_complete, outcome) = completion();
    proc.ctx.warmup.request_instant(id, destination, on_complete);
    assert_eq!(outcome.await.unwrap(), TeleportOutcome::Completed);

    let world = proc.ctx.worlds.world("overworld").unwrap();
    assert_eq!(
        world.transform_of(id).await.unwrap().unwrap(),
        Transform::new(50.0, 64.0, 50.0, 90.0, 0.0)
    );
    // Still owned by the same world; nothing was detached.
    assert_eq!(proc.ctx.worlds.world_name_of(id).as_deref(), Some("overworld"));
}

#[tokio::test(start_paused = true)]
async fn handoff_records_previous_location_first() {
    let proc = Proc::start("alpha", &["overworld"], MemoryBroker::new()).await;
    let id = proc.join("Steve", "overworld", START).await;

    let (on_complete, outcome) = completion();
    proc.ctx.warmup.request_instant(id, dest("alpha", "overworld", 50.0, 64.0, 50.0), on_complete);
    outcome.await.unwrap();

    let previous = proc.ctx.locations.previous(id).unwrap();
    assert_eq!(previous.world, "overworld");
    assert_eq!((previous.x, previous.y, previous.z), (10.0, 64.0, 10.0));
    // Reading does not consume; a second return is possible.
    assert!(proc.ctx.locations.previous(id).is_some());

    // An explicit clear does.
    proc.ctx.locations.forget(id);
    assert!(proc.ctx.locations.previous(id).is_none());
}

#[tokio::test(start_paused = true)]
async fn cross_world_handoff_detaches_attaches_then_moves() {
    let proc = Proc::start("alpha", &["w1", "w2"], MemoryBroker::new()).await;
    let id = proc.join("Steve", "w1", START).await;
    let mut events = proc.ctx.worlds.subscribe();

    let (on_complete, outcome) = completion();
    proc.ctx.warmup.request_instant(id, dest("alpha", "w2", 5.0, 70.0, 5.0), on_complete);
    assert_eq!(outcome.await.unwrap(), TeleportOutcome::Completed);

    // Exactly: detach from w1, attach to w2, transform applied on w2.
    match events.recv().await.unwrap() {
        WorldEvent::Detached { world, id: got } => {
            assert_eq!(world, "w1");
            assert_eq!(got, id);
        }
        other => panic!("expected Detached first, got {other:?}"),
    }
    match events.recv().await.unwrap() {
        WorldEvent::Attached { world, .. } => assert_eq!(world, "w2"),
        other => panic!("expected Attached second, got {other:?}"),
    }
    match events.recv().await.unwrap() {
        WorldEvent::Moved { world, transform, .. } => {
            assert_eq!(world, "w2");
            assert_eq!(transform, Transform::at(5.0, 70.0, 5.0));
        }
        other => panic!("expected Moved last, got {other:?}"),
    }

    assert_eq!(proc.ctx.worlds.world_name_of(id).as_deref(), Some("w2"));
    let w1 = proc.ctx.worlds.world("w1").unwrap();
    assert!(w1.transform_of(id).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn rejected_attach_restores_origin_world() {
    let proc = Proc::start("alpha", &["w1", "w2"], MemoryBroker::new()).await;
    let id = proc.join("Steve", "w1", START).await;

    // w2 is unloading and refuses new players.
    proc.ctx.worlds.world("w2").unwrap().set_accepting(false).await.unwrap();

    let (on_complete, outcome) = completion();
    proc.ctx.warmup.request_instant(id, dest("alpha", "w2", 5.0, 70.0, 5.0), on_complete);
    assert_eq!(
        outcome.await.unwrap(),
        TeleportOutcome::Failed(FailureReason::TransferRejected)
    );

    // Back in w1, exactly where they were.
    assert_eq!(proc.ctx.worlds.world_name_of(id).as_deref(), Some("w1"));
    let w1 = proc.ctx.worlds.world("w1").unwrap();
    assert_eq!(w1.transform_of(id).await.unwrap().unwrap(), START);
}

#[tokio::test(start_paused = true)]
async fn unknown_destination_world_aborts_without_moving() {
    let proc = Proc::start("alpha", &["overworld"], MemoryBroker::new()).await;
    let id = proc.join("Steve", "overworld", START).await;

    let (on_complete, outcome) = completion();
    proc.ctx.warmup.request_instant(id, dest("alpha", "nether", 0.0, 64.0, 0.0), on_complete);
    assert_eq!(
        outcome.await.unwrap(),
        TeleportOutcome::Failed(FailureReason::UnknownDestinationWorld)
    );

    let world = proc.ctx.worlds.world("overworld").unwrap();
    assert_eq!(world.transform_of(id).await.unwrap().unwrap(), START);
}

#[tokio::test(start_paused = true)]
async fn cross_server_handoff_publishes_intent_and_stays_put() {
    let broker = MemoryBroker::new();
    let mut intents = broker.subscribe(&[TOPIC_TELEPORT]).await.unwrap();
    let proc = Proc::start("alpha", &["overworld"], broker).await;
    let id = proc.join("Steve", "overworld", START).await;

    let destination = ServerLocation::new("beta", "spawn", 0.0, 80.0, 0.0, 0.0, 0.0);
    let (on_complete, outcome) = completion();
    proc.ctx.warmup.request_instant(id, destination.clone(), on_complete);
    assert_eq!(outcome.await.unwrap(), TeleportOutcome::Completed);

    let message = intents.recv().await.unwrap();
    match ChannelMessage::decode(&message).unwrap().unwrap() {
        ChannelMessage::Teleport { player_id, target_server, location } => {
            assert_eq!(player_id, id);
            assert_eq!(target_server, "beta");
            assert_eq!(location.parse::<ServerLocation>().unwrap(), destination);
        }
        other => panic!("expected a teleport intent, got {other:?}"),
    }

    // The local store is untouched; the connection transfer finishes the move.
    let world = proc.ctx.worlds.world("overworld").unwrap();
    assert_eq!(world.transform_of(id).await.unwrap().unwrap(), START);
}

#[tokio::test(start_paused = true)]
async fn arrival_completes_a_published_intent() {
    let broker = MemoryBroker::new();
    let alpha = Proc::start("alpha", &["overworld"], broker.clone()).await;
    let beta = Proc::start("beta", &["spawn"], broker.clone()).await;

    let id = alpha.join("Steve", "overworld", START).await;
    let destination = ServerLocation::new("beta", "spawn", 7.0, 80.0, 7.0, 45.0, 0.0);
    let (on_complete, outcome) = completion();
    alpha.ctx.warmup.request_instant(id, destination, on_complete);
    assert_eq!(outcome.await.unwrap(), TeleportOutcome::Completed);
    settle().await;

    // The intent waits on beta until the player's connection shows up there.
    assert!(beta.ctx.arrivals.is_waiting(id));

    let session = waystone_server::session::PlayerSession::new(
        id,
        "Steve",
        "spawn",
        Transform::at(0.0, 80.0, 0.0),
    );
    beta.join_session(session).await;

    assert!(!beta.ctx.arrivals.is_waiting(id));
    let spawn = beta.ctx.worlds.world("spawn").unwrap();
    assert_eq!(
        spawn.transform_of(id).await.unwrap().unwrap(),
        Transform::new(7.0, 80.0, 7.0, 45.0, 0.0)
    );
}

#[tokio::test(start_paused = true)]
async fn intent_for_another_server_is_ignored() {
    let broker = MemoryBroker::new();
    let gamma = Proc::start("gamma", &["spawn"], broker.clone()).await;
    let alpha = Proc::start("alpha", &["overworld"], broker.clone()).await;

    let id = alpha.join("Steve", "overworld", START).await;
    let (on_complete, outcome) = completion();
    alpha
        .ctx
        .warmup
        .request_instant(id, dest("beta", "spawn", 0.0, 80.0, 0.0), on_complete);
    outcome.await.unwrap();
    settle().await;

    assert!(!gamma.ctx.arrivals.is_waiting(id));
}

#[tokio::test(start_paused = true)]
async fn return_action_replays_previous_location() {
    let proc = Proc::start("alpha", &["overworld"], MemoryBroker::new()).await;
    let id = proc.join("Steve", "overworld", START).await;

    let (on_complete, outcome) = completion();
    proc.ctx.warmup.request_instant(id, dest("alpha", "overworld", 50.0, 64.0, 50.0), on_complete);
    outcome.await.unwrap();
    settle().await;

    let (on_complete, outcome) = completion();
    proc.ctx.request_return(id, on_complete);
    assert_eq!(outcome.await.unwrap(), TeleportOutcome::Completed);

    let world = proc.ctx.worlds.world("overworld").unwrap();
    assert_eq!(world.transform_of(id).await.unwrap().unwrap(), START);
}

#[tokio::test(start_paused = true)]
async fn return_without_history_fails() {
    let proc = Proc::start("alpha", &["overworld"], MemoryBroker::new()).await;
    let id = proc.join("Steve", "overworld", START).await;

    let (on_complete, outcome) = completion();
    proc.ctx.request_return(id, on_complete);
    assert_eq!(
        outcome.await.unwrap(),
        TeleportOutcome::Failed(FailureReason::NoPreviousLocation)
    );
}

#[tokio::test(start_paused = true)]
async fn intent_raced_by_early_arrival_applies_on_receipt() {
    // The player's connection can land before the broker message does; the
    // router must then apply the teleport immediately instead of shelving it.
    let broker = MemoryBroker::new();
    let beta = Proc::start("beta", &["spawn"], broker.clone()).await;

    let id = beta.join("Steve", "spawn", Transform::at(0.0, 80.0, 0.0)).await;
    let destination = ServerLocation::new("beta", "spawn", 7.0, 80.0, 7.0, 0.0, 0.0);
    let message = ChannelMessage::Teleport {
        player_id: id,
        target_server: "beta".into(),
        location: destination.to_string(),
    };
    broker.publish(message.topic(), &message.encode()).await.unwrap();
    settle().await;

    assert!(!beta.ctx.arrivals.is_waiting(id));
    let spawn = beta.ctx.worlds.world("spawn").unwrap();
    assert_eq!(
        spawn.transform_of(id).await.unwrap().unwrap(),
        Transform::at(7.0, 80.0, 7.0)
    );
}
