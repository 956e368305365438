//! Router openness: topics outside the fixed protocol reach registered
//! handlers; unregistered ones are ignored without touching protocol state.

mod common;

use std::sync::{Arc, Mutex};

use common::{RecordingNotifier, config, settle};
use waystone_engine::world::WorldRegistry;
use waystone_server::broker::{Broker, InboundMessage, MemoryBroker};
use waystone_server::context::Context;
use waystone_server::handoff::NoopTransfer;
use waystone_server::notify::Notifier;
use waystone_server::router::Router;

#[tokio::test(start_paused = true)]
async fn registered_handlers_receive_foreign_topics() {
    let broker = MemoryBroker::new();
    let notifier = RecordingNotifier::new();
    let ctx = Context::new(
        config("alpha"),
        Arc::new(broker.clone()),
        Arc::new(WorldRegistry::new()),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        Arc::new(NoopTransfer),
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let mut router = Router::new(Arc::clone(&ctx));
    router.register(
        "economy-sync",
        Box::new(move |message: &InboundMessage| {
            sink.lock().unwrap().push(message.payload.clone());
        }),
    );
    tokio::spawn(router.run());
    settle().await;

    broker.publish("economy-sync", r#"{"balance":10}"#).await.unwrap();
    // Not subscribed, never delivered anywhere.
    broker.publish("unrelated", "noise").await.unwrap();
    settle().await;

    assert_eq!(*seen.lock().unwrap(), vec![r#"{"balance":10}"#.to_string()]);
    // Protocol state was untouched by the foreign traffic.
    assert_eq!(ctx.presence.online_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn protocol_topics_cannot_be_shadowed() {
    let broker = MemoryBroker::new();
    let notifier = RecordingNotifier::new();
    let ctx = Context::new(
        config("alpha"),
        Arc::new(broker.clone()),
        Arc::new(WorldRegistry::new()),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        Arc::new(NoopTransfer),
    );

    let seen = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&seen);
    let mut router = Router::new(Arc::clone(&ctx));
    // Registration against a protocol topic is refused; presence still runs.
    router.register(
        "player-join",
        Box::new(move |_: &InboundMessage| {
            *sink.lock().unwrap() += 1;
        }),
    );
    tokio::spawn(router.run());
    settle().await;

    let id = uuid::Uuid::new_v4();
    let join = waystone_server::protocol::ChannelMessage::PlayerJoin {
        player_id: id,
        name: "Steve".into(),
        server: "beta".into(),
    };
    broker.publish(join.topic(), &join.encode()).await.unwrap();
    settle().await;

    assert_eq!(*seen.lock().unwrap(), 0);
    assert!(ctx.presence.is_online(id));
}
