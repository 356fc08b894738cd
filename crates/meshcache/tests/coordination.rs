//! Multi-service coordination tests against the in-memory store.
//!
//! Every test runs two or more coordinators on one `MemoryServer`, which
//! plays the shared store. The server tap observes every publish.

use std::sync::Arc;
use std::time::Duration;

use meshcache::{
    BatchOp, Channel, CoordinationEvent, CoordinatorConfig, HealthStatus, ServiceCoordinator,
};
use meshcache_store::memory::{MemoryClient, MemoryServer};
use meshcache_store::{Publisher, StoreMessage};
use serde_json::{Map, Value, json};
use tokio::sync::{broadcast, mpsc};

async fn connect(server: &Arc<MemoryServer>, config: CoordinatorConfig) -> (ServiceCoordinator, MemoryClient) {
    let client = server.client();
    let coordinator = ServiceCoordinator::connect_with(config, client.connections())
        .await
        .expect("coordinator should connect");
    (coordinator, client)
}

async fn service(server: &Arc<MemoryServer>, name: &str) -> (ServiceCoordinator, MemoryClient) {
    connect(server, CoordinatorConfig::for_service(name)).await
}

/// Forward every event `coordinator` receives on `channel` into a queue.
fn record(coordinator: &ServiceCoordinator, channel: Channel) -> mpsc::UnboundedReceiver<CoordinationEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    coordinator.events().on_fn(channel, "test_recorder", move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("event not delivered in time")
        .expect("handler channel closed")
}

fn drain(tap: &mut broadcast::Receiver<StoreMessage>) -> Vec<StoreMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = tap.try_recv() {
        messages.push(message);
    }
    messages
}

/// Wait until `receiver` has processed everything published before this call.
///
/// A listener consumes all of its channels from one stream, so a direct
/// message sent now is handled after anything already queued.
async fn settle(sender: &ServiceCoordinator, receiver: &ServiceCoordinator) {
    let mut marker = record(receiver, Channel::service(receiver.service_name()));
    sender
        .events()
        .publish_to_service(receiver.service_name(), Map::new())
        .await
        .unwrap();
    next(&mut marker).await;
}

#[tokio::test]
async fn set_then_get_round_trips_json_values() {
    let server = MemoryServer::new();
    let (claims, _) = service(&server, "claims").await;

    let values = [
        json!({"amount": 500, "currency": "EUR", "lines": [1, 2, 3]}),
        json!([{"nested": {"deep": true}}, null]),
        json!("500"),
        json!("plain text"),
        json!(42.5),
        json!(false),
        json!(null),
    ];

    for (i, value) in values.iter().enumerate() {
        let key = format!("value:{i}");
        claims.cache().set(&key, value, None).await.unwrap();
        assert_eq!(claims.cache().get(&key).await.as_ref(), Some(value), "value {i}");
    }
}

#[tokio::test(start_paused = true)]
async fn ttl_counts_down_and_entry_expires() {
    let server = MemoryServer::new();
    let (claims, _) = service(&server, "claims").await;

    claims.cache().set("session", &json!({"user": 7}), Some(5)).await.unwrap();
    let ttl = claims.cache().ttl("session").await;
    assert!(ttl > 0 && ttl <= 5, "ttl was {ttl}");
    assert!(claims.cache().exists("session").await);

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(claims.cache().get("session").await, None);
    assert!(!claims.cache().exists("session").await);
    assert_eq!(claims.cache().ttl("session").await, -2);
}

#[tokio::test]
async fn service_does_not_react_to_its_own_events() {
    let server = MemoryServer::new();
    let (claims, _) = service(&server, "claims").await;
    let (policy, _) = service(&server, "policy").await;

    let mut own = record(&claims, Channel::CacheUpdate);
    let mut peer = record(&policy, Channel::CacheUpdate);

    claims.cache().set("claim:1", &json!(1), None).await.unwrap();
    let seen = next(&mut peer).await;
    assert_eq!(seen.origin(), "claims");

    settle(&policy, &claims).await;
    assert!(own.try_recv().is_err());
}

#[tokio::test]
async fn delete_propagates_exactly_one_invalidation() {
    let server = MemoryServer::new();
    let mut tap = server.tap();
    let (claims, _) = service(&server, "claims").await;
    let (policy, _) = service(&server, "policy").await;
    let mut invalidations = record(&policy, Channel::CacheInvalidate);

    claims.cache().set("claim:CLM-001", &json!({"amount": 500}), None).await.unwrap();
    assert_eq!(claims.cache().delete("claim:CLM-001").await, 1);

    let event = next(&mut invalidations).await;
    assert_eq!(event.origin(), "claims");
    assert_eq!(event.invalidated_keys(), vec!["claims:claim:CLM-001"]);

    let published: Vec<_> = drain(&mut tap)
        .into_iter()
        .filter(|m| m.channel == "cache:invalidate")
        .collect();
    assert_eq!(published.len(), 1);

    settle(&claims, &policy).await;
    assert!(invalidations.try_recv().is_err());
}

#[tokio::test]
async fn pattern_invalidation_without_matches_is_silent() {
    let server = MemoryServer::new();
    let mut tap = server.tap();
    let (policy, _) = service(&server, "policy").await;

    policy.cache().set("quote:1", &json!(1), None).await.unwrap();
    drain(&mut tap);

    assert_eq!(policy.cache().invalidate_pattern("claim:*").await.unwrap(), 0);
    assert!(drain(&mut tap).is_empty());
    assert!(policy.cache().exists("quote:1").await);
}

#[tokio::test]
async fn pattern_invalidation_announces_matched_keys() {
    let server = MemoryServer::new();
    let (policy, _) = service(&server, "policy").await;
    let (claims, _) = service(&server, "claims").await;
    let mut patterns = record(&claims, Channel::PatternInvalidate);

    for id in ["1", "2", "3"] {
        policy.cache().set(&format!("quote:{id}"), &json!(id), None).await.unwrap();
    }
    policy.cache().set("customer:1", &json!("keep"), None).await.unwrap();

    assert_eq!(policy.cache().invalidate_pattern("quote:*").await.unwrap(), 3);
    assert!(policy.cache().exists("customer:1").await);

    let CoordinationEvent::PatternInvalidate(event) = next(&mut patterns).await else {
        panic!("expected a pattern invalidation");
    };
    assert_eq!(event.service, "policy");
    assert_eq!(event.pattern, "policy:quote:*");
    assert_eq!(event.count, 3);
    assert_eq!(
        event.keys,
        vec!["policy:quote:1", "policy:quote:2", "policy:quote:3"]
    );
}

#[tokio::test]
async fn deleting_missing_key_is_silent() {
    let server = MemoryServer::new();
    let mut tap = server.tap();
    let (claims, _) = service(&server, "claims").await;

    assert_eq!(claims.cache().delete("never-written").await, 0);
    assert!(drain(&mut tap).is_empty());
}

#[tokio::test]
async fn registry_tracks_connect_and_disconnect() {
    let server = MemoryServer::new();
    let (claims, _) = service(&server, "claims").await;
    let (policy, _) = service(&server, "policy").await;

    let names: Vec<String> = policy.registry().list_live().await.into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["claims", "policy"]);

    claims.disconnect().await.unwrap();
    let names: Vec<String> = policy.registry().list_live().await.into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["policy"]);
}

#[tokio::test(start_paused = true)]
async fn crashed_service_drops_out_after_ttl() {
    let server = MemoryServer::new();
    let (policy, _) = service(&server, "policy").await;
    let (claims, _) = service(&server, "claims").await;

    // No disconnect: the heartbeat stops and the record is left to expire.
    drop(claims);

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(policy.registry().lookup("claims").await.is_some());

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(policy.registry().lookup("claims").await.is_none());
    assert_eq!(policy.registry().list_live().await.len(), 1);
}

#[tokio::test]
async fn claims_write_is_visible_to_policy() {
    let server = MemoryServer::new();
    let (claims, _) = service(&server, "claims").await;
    let (policy, _) = service(&server, "policy").await;
    let mut updates = record(&policy, Channel::CacheUpdate);

    claims
        .cache()
        .set("claim:CLM-001", &json!({"amount": 500}), Some(7200))
        .await
        .unwrap();

    let CoordinationEvent::CacheUpdate(event) = next(&mut updates).await else {
        panic!("expected a cache update");
    };
    assert_eq!(event.key, "claims:claim:CLM-001");
    assert_eq!(event.service, "claims");
    assert_eq!(event.ttl, 7200);

    assert_eq!(claims.cache().get("claim:CLM-001").await, Some(json!({"amount": 500})));
}

#[tokio::test]
async fn reregistration_under_same_name_keeps_latest_record() {
    let server = MemoryServer::new();

    let mut first = CoordinatorConfig::for_service("claims");
    first.service.port = 8001;
    let (old, _) = connect(&server, first).await;
    let old_record = old.registry().lookup("claims").await.unwrap();

    let mut second = CoordinatorConfig::for_service("claims");
    second.service.port = 8002;
    let (new, _) = connect(&server, second).await;

    let live = new.registry().list_live().await;
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].port, 8002);
    assert!(live[0].registered_at >= old_record.registered_at);
}

#[tokio::test]
async fn reads_fail_soft_while_store_is_down() {
    let server = MemoryServer::new();
    let (claims, client) = service(&server, "claims").await;
    claims.cache().set("claim:1", &json!(1), None).await.unwrap();

    client.set_online(false);
    assert_eq!(claims.cache().get("claim:1").await, None);
    assert_eq!(claims.cache().get_as::<i64>("claim:1").await, None);
    assert!(!claims.cache().exists("claim:1").await);
    assert_eq!(claims.cache().ttl("claim:1").await, -1);
    assert_eq!(claims.registry().list_live().await, Vec::new());

    assert!(claims.cache().set("claim:2", &json!(2), None).await.is_err());
    assert!(claims.transactions().run_batch(&[BatchOp::incr("n", 1)]).await.is_err());

    client.set_online(true);
    assert_eq!(claims.cache().get_as::<i64>("claim:1").await, Some(1));
}

#[tokio::test]
async fn malformed_events_are_dropped_and_listener_survives() {
    let server = MemoryServer::new();
    let (policy, _) = service(&server, "policy").await;
    let mut updates = record(&policy, Channel::CacheUpdate);

    let raw = server.client().connections().publisher;
    raw.publish("cache:update", "{definitely not json").await.unwrap();
    raw.publish("cache:update", r#"{"service":"billing","ttl":"soon"}"#).await.unwrap();
    raw.publish(
        "cache:update",
        r#"{"service":"billing","key":"billing:inv:1","operation":"set","ttl":60,"timestamp":1}"#,
    )
    .await
    .unwrap();

    let event = next(&mut updates).await;
    assert_eq!(event.origin(), "billing");
    assert_eq!(event.invalidated_keys(), vec!["billing:inv:1"]);
    assert!(updates.try_recv().is_err());
}

#[tokio::test]
async fn domain_events_reach_subscribed_services() {
    let server = MemoryServer::new();
    let (claims, _) = service(&server, "claims").await;

    let mut config = CoordinatorConfig::for_service("policy");
    config.events.domains = vec!["claims".into()];
    let (policy, _) = connect(&server, config).await;
    let mut domain = record(&policy, Channel::domain("claims"));

    let mut payload = Map::new();
    payload.insert("claimId".into(), json!("CLM-001"));
    payload.insert("status".into(), json!("approved"));
    claims.events().publish_domain("claims", payload).await.unwrap();

    let CoordinationEvent::Domain(event) = next(&mut domain).await else {
        panic!("expected a domain event");
    };
    assert_eq!(event.service, "claims");
    assert_eq!(event.payload.get("status"), Some(&Value::from("approved")));
}

#[tokio::test]
async fn unhandled_subscribed_channel_does_not_stall_listener() {
    let server = MemoryServer::new();
    let (claims, _) = service(&server, "claims").await;

    // Subscribed to `fraud:events`, but nothing handles it.
    let mut config = CoordinatorConfig::for_service("policy");
    config.events.domains = vec!["fraud".into()];
    let (policy, _) = connect(&server, config).await;
    let mut updates = record(&policy, Channel::CacheUpdate);

    let receivers = claims
        .events()
        .publish_domain("fraud", Map::new())
        .await
        .unwrap();
    assert_eq!(receivers, 1);

    claims.cache().set("claim:1", &json!(1), None).await.unwrap();
    let event = next(&mut updates).await;
    assert_eq!(event.invalidated_keys(), vec!["claims:claim:1"]);
}

#[tokio::test]
async fn peer_write_evicts_near_cache() {
    let server = MemoryServer::new();

    let shared = |name: &str| {
        let mut config = CoordinatorConfig::for_service(name);
        config.cache.key_prefix = Some("shared".into());
        config.cache.near_cache.enabled = true;
        config
    };
    let (claims, _) = connect(&server, shared("claims")).await;
    let (policy, _) = connect(&server, shared("policy")).await;

    let (tx, mut evicted) = mpsc::unbounded_channel();
    policy.invalidation().on_peer_invalidation(move |key| {
        let _ = tx.send(key.to_string());
    });

    claims.cache().set("rate", &json!(1), None).await.unwrap();
    assert_eq!(next(&mut evicted).await, "shared:rate");
    assert_eq!(policy.cache().get("rate").await, Some(json!(1)));
    assert!(policy.near_cache().unwrap().get("shared:rate").is_some());

    claims.cache().set("rate", &json!(2), None).await.unwrap();
    assert_eq!(next(&mut evicted).await, "shared:rate");
    assert!(policy.near_cache().unwrap().get("shared:rate").is_none());
    assert_eq!(policy.cache().get("rate").await, Some(json!(2)));
}

#[tokio::test]
async fn events_published_during_disconnect_are_lost() {
    let server = MemoryServer::new();
    let (claims, _) = service(&server, "claims").await;
    let (policy, policy_client) = service(&server, "policy").await;
    let mut invalidations = record(&policy, Channel::CacheInvalidate);

    claims.cache().set("a", &json!(1), None).await.unwrap();
    claims.cache().set("b", &json!(2), None).await.unwrap();

    policy_client.set_online(false);
    claims.cache().delete("a").await;
    policy_client.set_online(true);
    claims.cache().delete("b").await;

    let event = next(&mut invalidations).await;
    assert_eq!(event.invalidated_keys(), vec!["claims:b"]);
}

#[tokio::test]
async fn batches_are_atomic_and_not_announced() {
    let server = MemoryServer::new();
    let mut tap = server.tap();
    let (billing, _) = service(&server, "billing").await;

    let results = billing
        .transactions()
        .run_batch(&[
            BatchOp::set("invoice:1", &json!({"total": 99}), Some(60)).unwrap(),
            BatchOp::incr("invoices", 1),
        ])
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert!(drain(&mut tap).is_empty());

    assert_eq!(billing.cache().get("invoice:1").await, Some(json!({"total": 99})));
    assert_eq!(billing.cache().get("invoices").await, Some(json!(1)));
}

#[tokio::test]
async fn health_check_reflects_connectivity() {
    let server = MemoryServer::new();
    let (claims, client) = service(&server, "claims").await;

    let report = claims.health().check(Duration::from_millis(200)).await;
    assert_eq!(report.status, HealthStatus::Healthy);

    client.set_online(false);
    let report = claims.health().check_default().await;
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert!(report.error.is_some());
}
