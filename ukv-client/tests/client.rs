use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use ukv_client::{
    Backend, CacheClient, CacheError, CacheResult, CallContext, ClientConfig, Connector,
    FieldValue, MemoryBackend, Shape, Topology, TtlStatus, TypedValue,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
struct Session {
    user: String,
    roles: Vec<String>,
    active: bool,
}

async fn memory_client() -> (Arc<MemoryBackend>, CacheClient) {
    let backend = Arc::new(MemoryBackend::new());
    let client = CacheClient::with_backend(backend.clone(), ClientConfig::new(["memory:0"]))
        .await
        .expect("client");
    (backend, client)
}

fn ctx() -> CallContext {
    CallContext::with_timeout(Duration::from_secs(5))
}

/// Connector that records which path the selector took.
#[derive(Default)]
struct RecordingConnector {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Connector for RecordingConnector {
    async fn connect_single(&self, endpoint: &str, db: i64) -> CacheResult<Arc<dyn Backend>> {
        self.calls.lock().push(format!("single {} db={}", endpoint, db));
        Ok(Arc::new(MemoryBackend::new()))
    }

    async fn connect_cluster(&self, endpoints: &[String]) -> CacheResult<Arc<dyn Backend>> {
        self.calls.lock().push(format!("cluster {}", endpoints.join(",")));
        Ok(Arc::new(MemoryBackend::with_topology(Topology::Cluster)))
    }
}

#[tokio::test]
async fn selector_picks_cluster_for_many_endpoints() {
    let connector = RecordingConnector::default();
    let config = ClientConfig::new(["10.0.0.1:7000", "10.0.0.2:7000"]);
    let client = CacheClient::connect_with(config, &connector).await.expect("connect");

    assert_eq!(client.topology(), Topology::Cluster);
    assert_eq!(
        connector.calls.lock().clone(),
        vec!["cluster 10.0.0.1:7000,10.0.0.2:7000".to_string()]
    );
}

#[tokio::test]
async fn selector_picks_single_node_with_db_option() {
    let connector = RecordingConnector::default();
    let config = ClientConfig::new(["127.0.0.1:6379"])
        .with_option("db", "4")
        .with_option("unused", "x");
    let client = CacheClient::connect_with(config, &connector).await.expect("connect");

    assert_eq!(client.topology(), Topology::SingleNode);
    assert_eq!(
        connector.calls.lock().clone(),
        vec!["single 127.0.0.1:6379 db=4".to_string()]
    );
}

#[tokio::test]
async fn selector_rejects_empty_endpoints() {
    let connector = RecordingConnector::default();
    let err = CacheClient::connect_with(ClientConfig::default(), &connector)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Validation(_)));
    assert!(connector.calls.lock().is_empty());
}

#[tokio::test]
async fn unreachable_backend_is_fatal() {
    let backend = Arc::new(MemoryBackend::new());
    backend.set_offline(true);
    let err = CacheClient::with_backend(backend, ClientConfig::new(["127.0.0.1:1"]))
        .await
        .unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn record_roundtrip_with_and_without_ttl() {
    let (_, client) = memory_client().await;
    let ctx = ctx();
    let session = Session {
        user: "ada".into(),
        roles: vec!["admin".into()],
        active: true,
    };

    client.set(&ctx, "session:1", &session, Duration::ZERO).await.unwrap();
    assert_eq!(client.get::<Session>(&ctx, "session:1").await.unwrap(), session);
    assert_eq!(client.ttl(&ctx, "session:1").await.unwrap(), TtlStatus::NoExpiry);

    client
        .set(&ctx, "session:2", &session, Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(client.get::<Session>(&ctx, "session:2").await.unwrap(), session);
    let remaining = client.ttl(&ctx, "session:2").await.unwrap().remaining().unwrap();
    assert!(remaining > Duration::from_secs(29) && remaining <= Duration::from_secs(30));
}

#[tokio::test]
async fn scalars_and_sequences_roundtrip() {
    let (_, client) = memory_client().await;
    let ctx = ctx();

    client.set(&ctx, "n", &42u64, Duration::ZERO).await.unwrap();
    client.set(&ctx, "s", "text", Duration::ZERO).await.unwrap();
    client.set(&ctx, "list", &vec![1.5, 2.5], Duration::ZERO).await.unwrap();

    assert_eq!(client.get::<u64>(&ctx, "n").await.unwrap(), 42);
    assert_eq!(client.get::<String>(&ctx, "s").await.unwrap(), "text");
    assert_eq!(client.get::<Vec<f64>>(&ctx, "list").await.unwrap(), vec![1.5, 2.5]);
}

#[tokio::test]
async fn zero_values_are_found() {
    let (_, client) = memory_client().await;
    let ctx = ctx();

    client.set(&ctx, "zero", &0i64, Duration::ZERO).await.unwrap();
    client.set(&ctx, "empty", &Session::default(), Duration::ZERO).await.unwrap();

    assert_eq!(client.get::<i64>(&ctx, "zero").await.unwrap(), 0);
    assert_eq!(
        client.get::<Session>(&ctx, "empty").await.unwrap(),
        Session::default()
    );
    assert_eq!(
        client.get_as(&ctx, "zero", Shape::Int).await.unwrap(),
        TypedValue::Int(0)
    );
}

#[tokio::test]
async fn get_into_leaves_sink_on_missing_key() {
    let (_, client) = memory_client().await;
    let ctx = ctx();
    let mut sink = Session {
        user: "unchanged".into(),
        ..Session::default()
    };

    let err = client.get_into(&ctx, "missing", &mut sink).await.unwrap_err();
    assert_eq!(err, CacheError::NotFound);
    assert_eq!(sink.user, "unchanged");

    client.set(&ctx, "bad", "not a session", Duration::ZERO).await.unwrap();
    let err = client.get_into(&ctx, "bad", &mut sink).await.unwrap_err();
    assert!(matches!(err, CacheError::Decode(_)));
    assert_eq!(sink.user, "unchanged");
}

#[tokio::test]
async fn get_as_converts_shapes() {
    let (_, client) = memory_client().await;
    let ctx = ctx();

    client.set(&ctx, "pi", &3.5, Duration::ZERO).await.unwrap();
    assert_eq!(
        client.get_as(&ctx, "pi", Shape::Float).await.unwrap(),
        TypedValue::Float(3.5)
    );
    assert!(matches!(
        client.get_as(&ctx, "pi", Shape::Int).await,
        Err(CacheError::Decode(_))
    ));
    assert_eq!(
        client.get_as(&ctx, "missing", Shape::Text).await,
        Err(CacheError::NotFound)
    );
}

#[tokio::test]
async fn key_operations() {
    let (_, client) = memory_client().await;
    let ctx = ctx();

    assert!(client.set_if_absent(&ctx, "lock", "a", Duration::from_secs(10)).await.unwrap());
    assert!(!client.set_if_absent(&ctx, "lock", "b", Duration::ZERO).await.unwrap());
    assert_eq!(client.get::<String>(&ctx, "lock").await.unwrap(), "a");
    assert!(client.exists(&ctx, "lock").await.unwrap());
    assert_eq!(client.str_len(&ctx, "lock").await.unwrap(), 3);
    assert_eq!(client.key_type(&ctx, "lock").await.unwrap(), "string");
    let described = client.debug_object(&ctx, "lock").await.unwrap();
    assert!(described.contains("encoding:embstr serializedlength:3"), "{}", described);
    assert_eq!(
        client.debug_object(&ctx, "nothing").await.unwrap_err(),
        CacheError::Reply("ERR no such key".into())
    );

    client.rename(&ctx, "lock", "lock:renamed").await.unwrap();
    assert!(!client.exists(&ctx, "lock").await.unwrap());
    assert!(client.expire(&ctx, "lock:renamed", Duration::from_secs(3)).await.unwrap());
    assert!(!client.expire(&ctx, "nothing", Duration::from_secs(3)).await.unwrap());

    assert!(client.delete(&ctx, "lock:renamed").await.unwrap());
    assert_eq!(client.ttl(&ctx, "lock:renamed").await.unwrap(), TtlStatus::Missing);
    client.ping(&ctx).await.unwrap();
}

#[tokio::test]
async fn multi_key_operations() {
    let (_, client) = memory_client().await;
    let ctx = ctx();
    for (key, value) in [("user:1", 1), ("user:2", 2), ("order:1", 3)] {
        client.set(&ctx, key, &value, Duration::ZERO).await.unwrap();
    }

    let values: Vec<Option<i32>> = client
        .get_many(&ctx, &["user:1", "missing", "order:1"])
        .await
        .unwrap();
    assert_eq!(values, vec![Some(1), None, Some(3)]);

    let mut found = Vec::new();
    let mut cursor = 0;
    loop {
        let (keys, next) = client.scan_keys(&ctx, "user:*", cursor, 1).await.unwrap();
        found.extend(keys);
        if next == 0 {
            break;
        }
        cursor = next;
    }
    found.sort();
    assert_eq!(found, vec!["user:1", "user:2"]);

    assert_eq!(client.delete_many(&ctx, &["user:1", "user:2", "nope"]).await.unwrap(), 2);
}

#[tokio::test]
async fn validation_happens_before_round_trips() {
    let (backend, client) = memory_client().await;
    let ctx = ctx();
    let before = backend.round_trips();

    assert!(matches!(
        client.set(&ctx, "", &1, Duration::ZERO).await,
        Err(CacheError::Validation(_))
    ));
    assert!(matches!(
        client.set(&ctx, "k", &1, Duration::from_micros(1)).await,
        Err(CacheError::Validation(_))
    ));
    assert_eq!(backend.round_trips(), before);
}

#[tokio::test]
async fn wrong_type_surfaces_as_reply_error() {
    let (_, client) = memory_client().await;
    let ctx = ctx();
    client
        .set_field(&ctx, "profile", "name", "ada", Duration::ZERO)
        .await
        .unwrap();
    let err = client.get::<String>(&ctx, "profile").await.unwrap_err();
    assert!(matches!(err, CacheError::Reply(message) if message.starts_with("WRONGTYPE")));
}

#[tokio::test]
async fn hash_field_ttl_is_applied() {
    let (_, client) = memory_client().await;
    let ctx = ctx();
    let ttl = Duration::from_secs(5);

    assert!(client.set_field(&ctx, "h", "count", "1", ttl).await.unwrap());
    match client.ttl(&ctx, "h").await.unwrap() {
        TtlStatus::ExpiresIn(remaining) => assert!(remaining > Duration::ZERO && remaining <= ttl),
        other => panic!("expected a ttl, got {:?}", other),
    }
    assert!(!client.set_field(&ctx, "h", "count", "2", Duration::ZERO).await.unwrap());
}

#[tokio::test]
async fn hash_field_if_absent_skips_ttl_when_not_written() {
    let (_, client) = memory_client().await;
    let ctx = ctx();

    client
        .set_field(&ctx, "h", "owner", "ada", Duration::ZERO)
        .await
        .unwrap();
    let written = client
        .set_field_if_absent(&ctx, "h", "owner", "bob", Duration::from_secs(5))
        .await
        .unwrap();
    assert!(!written);
    assert_eq!(client.ttl(&ctx, "h").await.unwrap(), TtlStatus::NoExpiry);
    assert_eq!(client.get_field(&ctx, "h", "owner").await.unwrap(), "ada");
}

#[tokio::test]
async fn failed_hash_write_skips_ttl() {
    let (backend, client) = memory_client().await;
    let ctx = ctx();
    let ttl = Duration::from_secs(5);
    client.set(&ctx, "plain", "text", Duration::ZERO).await.unwrap();

    let before = backend.round_trips();
    let err = client.set_field(&ctx, "plain", "f", "v", ttl).await.unwrap_err();
    assert!(matches!(&err, CacheError::Reply(message) if message.starts_with("WRONGTYPE")));
    assert_eq!(backend.round_trips(), before + 1);

    let err = client
        .set_fields(&ctx, "plain", [("a", "1"), ("b", "2")], ttl)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Reply(_)));
    assert_eq!(client.ttl(&ctx, "plain").await.unwrap(), TtlStatus::NoExpiry);
}

#[tokio::test]
async fn hash_field_reads_and_increments() {
    let (_, client) = memory_client().await;
    let ctx = ctx();

    let created = client
        .set_fields(
            &ctx,
            "stats",
            vec![
                ("visits", FieldValue::from("10")),
                ("meta", FieldValue::encode(&vec!["a"]).unwrap()),
            ],
            Duration::ZERO,
        )
        .await
        .unwrap();
    assert_eq!(created, 2);

    assert_eq!(
        client.increment_field(&ctx, "stats", "visits", 5).await.unwrap(),
        "15"
    );
    assert_eq!(
        client.get_field(&ctx, "stats", "meta").await.unwrap(),
        "[\"a\"]"
    );
    assert_eq!(
        client.get_field(&ctx, "stats", "missing").await,
        Err(CacheError::NotFound)
    );

    let fields = client
        .get_fields(&ctx, "stats", &["visits", "missing"])
        .await
        .unwrap();
    assert_eq!(fields.get("visits"), Some(&Some("15".to_string())));
    assert_eq!(fields.get("missing"), Some(&None));

    let all = client.get_all_fields(&ctx, "stats").await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all["visits"], "15");
}

#[tokio::test]
async fn cancelled_context_stops_calls() {
    let (_, client) = memory_client().await;
    let (ctx, handle) = CallContext::cancellable();
    handle.cancel();
    assert_eq!(client.exists(&ctx, "k").await, Err(CacheError::Cancelled));
}

#[tokio::test]
async fn offline_backend_reports_backend_errors() {
    let (backend, client) = memory_client().await;
    backend.set_offline(true);
    let err = client.get::<String>(&ctx(), "k").await.unwrap_err();
    assert!(matches!(err, CacheError::Backend { .. }));
    assert!(!err.is_fatal());
}
