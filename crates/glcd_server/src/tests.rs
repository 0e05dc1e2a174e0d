//! End-to-end hub scenarios over the in-memory backends.

use crate::persistence::auth::hash_password;
use crate::persistence::{AuthRecord, Zone};
use crate::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::pending;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SECRET: &str = "s3cret";

struct Harness {
    bus: Arc<MemoryBus>,
    store: Arc<MemoryStore>,
    registry: Arc<ClientRegistry>,
    topic: String,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<DispatchStats, HubError>>,
}

impl Harness {
    async fn start(config: HubConfig) -> Self {
        let topic = config.server_topic.clone();
        let (hub, bus, store) = create_memory_hub(config);
        let registry = hub.registry();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { hub.run(shutdown).await }
        });

        // The provisioning echo doubles as a probe: it is ignored by the hub.
        while bus.inject(&topic, r#"{"client":"server"}"#).await.is_err() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        Self {
            bus,
            store,
            registry,
            topic,
            shutdown,
            handle,
        }
    }

    async fn send(&self, message: Value) {
        let bytes = serde_json::to_vec(&message).expect("encodes");
        self.bus.inject(&self.topic, bytes).await.expect("hub is subscribed");
    }

    fn watch(&self, client: &str) -> broadcast::Receiver<Vec<u8>> {
        let address = registry::ClientAddress::parse(client).expect("reachable client id");
        self.bus.watch(&Destination::from(address))
    }

    async fn stop(self) -> DispatchStats {
        self.shutdown.cancel();
        self.handle
            .await
            .expect("hub task")
            .expect("hub stops cleanly")
    }
}

fn config() -> HubConfig {
    HubConfig {
        auth_secret: SECRET.to_string(),
        ..HubConfig::default()
    }
}

async fn reply(rx: &mut broadcast::Receiver<Vec<u8>>) -> Value {
    let bytes = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("reply in time")
        .expect("reply delivered");
    serde_json::from_slice(&bytes).expect("reply is json")
}

async fn replies(rx: &mut broadcast::Receiver<Vec<u8>>, n: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(reply(rx).await);
    }
    out
}

#[tokio::test(flavor = "multi_thread")]
async fn ping_is_answered_on_the_clients_own_topic() {
    let hub = Harness::start(config()).await;
    let mut arena = hub.bus.watch(&Destination::at("10.0.0.5:4151", "arena"));

    hub.send(json!({"client": "10.0.0.5:4151:arena", "command": "ping"})).await;

    let pong = reply(&mut arena).await;
    assert_eq!(pong["type"], "pong");
    let stamp = pong["data"].as_str().expect("timestamp string");
    assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    assert!(hub.registry.contains("10.0.0.5:4151:arena"));

    let stats = hub.stop().await;
    assert_eq!(stats.ignored, 1);
    assert_eq!(stats.routed, 1);
}

#[tokio::test(start_paused = true)]
async fn wall_fans_out_and_silent_clients_are_evicted() {
    let hub = Harness::start(config()).await;
    let (c1, c2, c3) = ("h:4150:c1", "h:4150:c2", "h:4150:c3");
    let mut c1_rx = hub.watch(c1);
    let mut c2_rx = hub.watch(c2);

    for client in [c1, c2, c3] {
        hub.send(json!({"client": client, "command": "heartbeat"})).await;
    }
    let wall = r#"{"client":"h:4150:c1","command":"wall","data":"hi"}"#;
    hub.bus.inject(&hub.topic, wall).await.expect("inject");

    for rx in [&mut c1_rx, &mut c2_rx] {
        let bytes = rx.recv().await.expect("wall delivered");
        assert_eq!(bytes, wall.as_bytes(), "delivered verbatim");
    }

    // C1 and C2 keep talking; C3 goes quiet.
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_secs(5)).await;
        for client in [c1, c2] {
            hub.send(json!({"client": client})).await;
        }
    }

    assert!(!hub.registry.contains(c3));
    assert!(hub.registry.contains(c1) && hub.registry.contains(c2));
    for rx in [&mut c1_rx, &mut c2_rx] {
        let gone = reply(rx).await;
        assert_eq!(gone, json!({"type": "playerGone", "data": {"client": c3}}));
    }
    let to_c1 = hub.bus.published(&Destination::at("h:4150", "c1"));
    assert_eq!(to_c1.len(), 2, "one wall and exactly one playerGone");

    hub.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn update_then_send_zone_returns_the_written_payload() {
    let hub = Harness::start(config()).await;
    let client = "h:4150:builder";
    let mut rx = hub.watch(client);

    hub.send(json!({
        "client": client,
        "command": "updateZone",
        "data": {"zone": "town", "data": {"tiles": [1, 2, 3]}}
    }))
    .await;
    assert_eq!(
        reply(&mut rx).await,
        json!({"type": "message", "data": "Updated zone 'town'"})
    );

    hub.send(json!({"client": client, "command": "sendZone", "data": {"zone": "town"}})).await;
    let first = reply(&mut rx).await;
    assert_eq!(first["type"], "updateZone");
    assert_eq!(first["data"]["zone"], "town");
    assert_eq!(first["data"]["zdata"], json!({"tiles": [1, 2, 3]}));
    assert_eq!(first["data"]["type"], "zone");

    hub.send(json!({
        "client": client,
        "command": "updateZone",
        "data": {"zone": "town", "data": {"tiles": []}}
    }))
    .await;
    reply(&mut rx).await;
    hub.send(json!({"client": client, "command": "sendZone", "data": {"zone": "town"}})).await;
    let second = reply(&mut rx).await;
    assert_eq!(second["data"]["zdata"], json!({"tiles": []}));
    assert_eq!(second["data"]["id"], first["data"]["id"], "id is assigned once");

    hub.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_zone_is_an_error_reply() {
    let hub = Harness::start(config()).await;
    let client = "h:4150:lost";
    let mut rx = hub.watch(client);

    hub.send(json!({"client": client, "type": "sendZone", "data": {"zone": "atlantis"}})).await;
    let err = reply(&mut rx).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["data"]["code"], "zone_not_found");
    assert!(hub.store.find_zone("atlantis").await.expect("store").is_none());

    hub.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn connected_twice_yields_identical_replies() {
    let hub = Harness::start(config()).await;
    let (c1, c2) = ("h:4150:c1", "h:4150:c2");
    let mut c1_rx = hub.watch(c1);

    for zone in ["north", "south"] {
        hub.send(json!({
            "client": c1,
            "command": "updateZone",
            "data": {"zone": zone, "data": {"name": zone}}
        }))
        .await;
    }
    replies(&mut c1_rx, 2).await;

    hub.send(json!({"client": c2, "command": "playerState", "data": {"x": 4, "y": 2}})).await;
    let relayed = reply(&mut c1_rx).await;
    assert_eq!(relayed["type"], "playerState");
    assert_eq!(relayed["data"]["client"], c2);
    assert_eq!(relayed["data"]["data"], json!({"x": 4, "y": 2}));

    hub.send(json!({"client": c1, "command": "connected"})).await;
    hub.send(json!({"client": c1, "command": "connected"})).await;
    let all = replies(&mut c1_rx, 6).await;
    let (first, second) = all.split_at(3);
    assert_eq!(first, second);

    let kinds: Vec<&str> = first.iter().filter_map(|v| v["type"].as_str()).collect();
    assert_eq!(kinds, vec!["updateZone", "updateZone", "playerState"]);
    assert_eq!(first[2], relayed);

    assert_eq!(hub.store.find_zones().await.expect("store").len(), 2);
    hub.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn auth_failures_are_distinguishable() {
    let hub = Harness::start(config()).await;
    hub.store.insert_auth(AuthRecord {
        user: "bob".into(),
        password_hash: hash_password(SECRET.as_bytes(), "salt", "hunter2").expect("hash"),
        salt: "salt".into(),
    });
    let client = "h:4150:login";
    let mut rx = hub.watch(client);

    let attempt = |user: &str, password: &str| {
        json!({"client": client, "command": "playerAuth", "data": {"user": user, "password": password}})
    };

    hub.send(attempt("bob", "hunter2")).await;
    assert_eq!(
        reply(&mut rx).await,
        json!({"type": "playerAuth", "data": {"user": "bob", "success": true}})
    );

    hub.send(attempt("bob", "letmein")).await;
    let wrong = reply(&mut rx).await;
    assert_eq!(wrong["data"]["success"], false);
    assert_eq!(wrong["data"]["code"], "invalid_password");

    hub.send(attempt("mallory", "hunter2")).await;
    let unknown = reply(&mut rx).await;
    assert_eq!(unknown["data"]["success"], false);
    assert_eq!(unknown["data"]["code"], "unknown_user");

    hub.store.insert_auth(AuthRecord {
        user: "carol".into(),
        password_hash: "not-a-digest".into(),
        salt: "salt".into(),
    });
    hub.send(attempt("carol", "hunter2")).await;
    let broken = reply(&mut rx).await;
    assert_eq!(broken["type"], "playerAuth");
    assert_eq!(broken["data"]["success"], false);
    assert_eq!(broken["data"]["code"], "malformed_record");

    hub.store.set_unavailable(true);
    hub.send(attempt("bob", "hunter2")).await;
    let down = reply(&mut rx).await;
    assert_eq!(down["type"], "error");
    assert_eq!(down["data"]["code"], "store_unavailable");

    hub.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn bad_messages_do_not_stop_the_hub() {
    let hub = Harness::start(config()).await;
    let client = "h:4150:ok";
    let mut rx = hub.watch(client);

    hub.bus.inject(&hub.topic, "not json").await.expect("inject");
    hub.send(json!({"command": "ping"})).await;
    hub.send(json!({"client": client, "command": "teleport"})).await;
    hub.send(json!({"client": client, "command": "ping"})).await;

    assert_eq!(reply(&mut rx).await["type"], "pong");

    let stats = hub.stop().await;
    assert_eq!(stats.decode_errors, 2);
    assert_eq!(stats.routing_errors, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_configuration_fails_before_subscribing() {
    let (hub, bus, _store) = create_memory_hub(HubConfig {
        channel_capacity: 0,
        ..config()
    });
    let err = hub
        .run(CancellationToken::new())
        .await
        .expect_err("rejected");
    assert!(matches!(err, HubError::Configuration(_)));
    assert!(bus.inject("glcd", "{}").await.is_err(), "never subscribed");
}

/// A store whose every call hangs.
struct UnresponsiveStore;

#[async_trait]
impl DocumentStore for UnresponsiveStore {
    async fn find_zones(&self) -> Result<Vec<Zone>, PersistenceError> {
        pending().await
    }

    async fn find_zone(&self, _name: &str) -> Result<Option<Zone>, PersistenceError> {
        pending().await
    }

    async fn update_zone(
        &self,
        _name: &str,
        _data: &Value,
        _timestamp: DateTime<Utc>,
    ) -> Result<bool, PersistenceError> {
        pending().await
    }

    async fn insert_zone_if_absent(
        &self,
        _name: &str,
        _data: &Value,
        _timestamp: DateTime<Utc>,
        _id: i64,
    ) -> Result<(), PersistenceError> {
        pending().await
    }

    async fn next_zone_id(&self) -> Result<i64, PersistenceError> {
        pending().await
    }

    async fn find_auth(&self, _user: &str) -> Result<Option<AuthRecord>, PersistenceError> {
        pending().await
    }

    async fn ping(&self) -> Result<(), PersistenceError> {
        pending().await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_is_bounded_when_the_store_hangs() {
    let config = HubConfig {
        channel_capacity: 1,
        shutdown_grace: Duration::from_millis(500),
        ..config()
    };
    let topic = config.server_topic.clone();
    let bus = Arc::new(MemoryBus::new());
    let hub = HubServer::new(config, bus.clone(), Arc::new(UnresponsiveStore));
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { hub.run(shutdown).await }
    });
    while bus.inject(&topic, r#"{"client":"server"}"#).await.is_err() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // One request is stuck in the store, one fills the queue, the rest back
    // up behind the dispatcher.
    for _ in 0..5 {
        let request = json!({"client": "h:4150:c1", "command": "sendZone", "data": {"zone": "town"}});
        let bytes = serde_json::to_vec(&request).expect("encodes");
        bus.inject(&topic, bytes).await.expect("inject");
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    shutdown.cancel();
    let stopped = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("hub stops within its grace period")
        .expect("hub task");
    assert!(stopped.is_ok());
}
