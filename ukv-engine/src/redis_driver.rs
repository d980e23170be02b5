//! # Redis Drivers
//!
//! Purpose: Speak to real Redis deployments through the `redis` crate, one
//! driver per topology, behind the shared `Backend` interface.
//!
//! ## Design Principles
//! 1. **One Conversion Path**: Every command, single or batched, goes through
//!    a pipeline whose raw replies are read back one per command, so server
//!    error replies come back as `Reply::Error` entries instead of failing
//!    the round trip.
//! 2. **Transport vs. Reply**: Only connection-level failures surface as
//!    `CacheError::Backend`.
//! 3. **Pub/Sub on Its Own Connection**: Subscriptions open a dedicated
//!    connection; clusters subscribe through their first node.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{Client, Pipeline, Value};

use ukv_common::{BatchMode, CacheError, CacheResult, Message, Reply, Topology, WireCommand};

use crate::backend::{Backend, MessageStream};

/// Driver for a single Redis node.
#[derive(Clone)]
pub struct RedisBackend {
    url: String,
    client: Client,
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Connects to `endpoint` (`host:port` or a `redis://` URL) using
    /// database index `db`.
    ///
    /// Only the connection is established here; callers probe with `ping`.
    pub async fn connect(endpoint: &str, db: i64) -> CacheResult<Self> {
        let url = node_url(endpoint, Some(db));
        let client = Client::open(url.as_str()).map_err(|err| connect_error(&url, err))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|err| connect_error(&url, err))?;
        tracing::debug!(url = %url, "connected to redis node");
        Ok(RedisBackend { url, client, conn })
    }
}

impl fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBackend").field("url", &self.url).finish()
    }
}

#[async_trait]
impl Backend for RedisBackend {
    fn topology(&self) -> Topology {
        Topology::SingleNode
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        ping(&mut conn).await
    }

    async fn execute(&self, command: WireCommand) -> CacheResult<Reply> {
        let mut conn = self.conn.clone();
        execute_one(&mut conn, command).await
    }

    async fn execute_batch(
        &self,
        commands: Vec<WireCommand>,
        mode: BatchMode,
    ) -> CacheResult<Vec<Reply>> {
        let mut conn = self.conn.clone();
        round_trip(&mut conn, &commands, mode).await
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> CacheResult<u64> {
        let mut conn = self.conn.clone();
        publish(&mut conn, channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> CacheResult<MessageStream> {
        subscribe(&self.client, channel).await
    }
}

/// Driver for a Redis Cluster deployment.
#[derive(Clone)]
pub struct RedisClusterBackend {
    nodes: Vec<String>,
    conn: ClusterConnection,
    pubsub_client: Client,
}

impl RedisClusterBackend {
    /// Connects to the cluster through the given seed endpoints.
    pub async fn connect(endpoints: &[String]) -> CacheResult<Self> {
        let nodes: Vec<String> = endpoints
            .iter()
            .map(|endpoint| node_url(endpoint, None))
            .collect();
        let joined = nodes.join(",");
        let Some(first) = nodes.first() else {
            return Err(CacheError::Validation("cluster needs at least one endpoint".into()));
        };

        let client = ClusterClient::new(nodes.clone()).map_err(|err| connect_error(&joined, err))?;
        let conn = client
            .get_async_connection()
            .await
            .map_err(|err| connect_error(&joined, err))?;
        let pubsub_client =
            Client::open(first.as_str()).map_err(|err| connect_error(first, err))?;
        tracing::debug!(nodes = %joined, "connected to redis cluster");

        Ok(RedisClusterBackend {
            nodes,
            conn,
            pubsub_client,
        })
    }
}

impl fmt::Debug for RedisClusterBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisClusterBackend")
            .field("nodes", &self.nodes)
            .finish()
    }
}

#[async_trait]
impl Backend for RedisClusterBackend {
    fn topology(&self) -> Topology {
        Topology::Cluster
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        ping(&mut conn).await
    }

    async fn execute(&self, command: WireCommand) -> CacheResult<Reply> {
        let mut conn = self.conn.clone();
        execute_one(&mut conn, command).await
    }

    async fn execute_batch(
        &self,
        commands: Vec<WireCommand>,
        mode: BatchMode,
    ) -> CacheResult<Vec<Reply>> {
        let mut conn = self.conn.clone();
        round_trip(&mut conn, &commands, mode).await
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> CacheResult<u64> {
        let mut conn = self.conn.clone();
        publish(&mut conn, channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> CacheResult<MessageStream> {
        subscribe(&self.pubsub_client, channel).await
    }
}

async fn ping<C>(conn: &mut C) -> CacheResult<()>
where
    C: ConnectionLike + Send,
{
    redis::cmd("PING")
        .query_async::<()>(conn)
        .await
        .map_err(|err| CacheError::backend("ping", err))
}

async fn execute_one<C>(conn: &mut C, command: WireCommand) -> CacheResult<Reply>
where
    C: ConnectionLike + Send,
{
    let op = command.name();
    round_trip(conn, std::slice::from_ref(&command), BatchMode::Pipeline)
        .await?
        .pop()
        .ok_or_else(|| CacheError::backend(op, "empty reply"))
}

async fn round_trip<C>(
    conn: &mut C,
    commands: &[WireCommand],
    mode: BatchMode,
) -> CacheResult<Vec<Reply>>
where
    C: ConnectionLike + Send,
{
    let op = match (commands, mode) {
        ([single], BatchMode::Pipeline) => single.name(),
        (_, BatchMode::Pipeline) => "pipeline",
        (_, BatchMode::Transaction) => "transaction",
    };
    if commands.is_empty() {
        return Ok(Vec::new());
    }
    let pipe = build_pipeline(commands, mode);
    // A transaction answers OK, one QUEUED per command, then the EXEC array.
    let (offset, count) = match mode {
        BatchMode::Pipeline => (0, commands.len()),
        BatchMode::Transaction => (commands.len() + 1, 1),
    };
    let values = conn
        .req_packed_commands(&pipe, offset, count)
        .await
        .map_err(|err| CacheError::backend(op, err))?;
    collect_replies(op, commands.len(), mode, values)
}

/// Lines raw replies up with the commands that produced them.
///
/// Server errors stay in place as `Reply::Error`; only a discarded or
/// malformed EXEC fails the whole round trip.
fn collect_replies(
    op: &str,
    expected: usize,
    mode: BatchMode,
    mut values: Vec<Value>,
) -> CacheResult<Vec<Reply>> {
    if mode == BatchMode::Transaction {
        values = match values.pop() {
            Some(Value::Array(items)) => items,
            Some(Value::Nil) => return Err(CacheError::backend(op, "transaction discarded")),
            Some(other) => {
                let reply = into_reply(other);
                let message = reply
                    .error_message()
                    .unwrap_or_else(|| format!("unexpected EXEC reply {:?}", reply));
                return Err(CacheError::backend(op, message));
            }
            None => return Err(CacheError::backend(op, "missing EXEC reply")),
        };
    }
    if values.len() != expected {
        return Err(CacheError::backend(
            op,
            format!("expected {} replies, got {}", expected, values.len()),
        ));
    }
    Ok(values.into_iter().map(into_reply).collect())
}

async fn publish<C>(conn: &mut C, channel: &str, payload: &[u8]) -> CacheResult<u64>
where
    C: ConnectionLike + Send,
{
    redis::cmd("PUBLISH")
        .arg(channel)
        .arg(payload)
        .query_async::<u64>(conn)
        .await
        .map_err(|err| CacheError::backend("publish", err))
}

async fn subscribe(client: &Client, channel: &str) -> CacheResult<MessageStream> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|err| CacheError::backend("subscribe", err))?;
    pubsub
        .subscribe(channel)
        .await
        .map_err(|err| CacheError::backend("subscribe", err))?;
    let stream = pubsub.into_on_message().map(|msg| {
        Message::new(
            msg.get_channel_name(),
            Bytes::copy_from_slice(msg.get_payload_bytes()),
        )
    });
    Ok(Box::pin(stream))
}

fn build_pipeline(commands: &[WireCommand], mode: BatchMode) -> Pipeline {
    let mut pipe = redis::pipe();
    if mode == BatchMode::Transaction {
        pipe.atomic();
    }
    for command in commands {
        pipe.add_command(to_redis_cmd(command));
    }
    pipe
}

fn to_redis_cmd(command: &WireCommand) -> redis::Cmd {
    let mut cmd = redis::cmd(command.name());
    for arg in command.arguments() {
        cmd.arg(arg.as_slice());
    }
    cmd
}

/// Converts a `redis` value into the driver-neutral reply shape.
fn into_reply(value: Value) -> Reply {
    match value {
        Value::Nil => Reply::NIL,
        Value::Int(value) => Reply::Integer(value),
        Value::BulkString(data) => Reply::Bulk(Some(data)),
        Value::SimpleString(text) => Reply::Simple(text.into_bytes()),
        Value::Okay => Reply::ok(),
        Value::Array(items) | Value::Set(items) => {
            Reply::Array(items.into_iter().map(into_reply).collect())
        }
        Value::Map(pairs) => Reply::Array(
            pairs
                .into_iter()
                .flat_map(|(key, value)| [into_reply(key), into_reply(value)])
                .collect(),
        ),
        Value::Double(value) => Reply::bulk(value.to_string()),
        Value::Boolean(value) => Reply::Integer(i64::from(value)),
        Value::ServerError(err) => match err.details() {
            Some(details) => Reply::error(format!("{} {}", err.code(), details)),
            None => Reply::error(err.code()),
        },
        other => Reply::error(format!("ERR unsupported reply {:?}", other)),
    }
}

/// Builds a connection URL from `host:port` or passes URLs through.
fn node_url(endpoint: &str, db: Option<i64>) -> String {
    if endpoint.contains("://") {
        return endpoint.to_string();
    }
    match db {
        Some(db) if db != 0 => format!("redis://{}/{}", endpoint, db),
        _ => format!("redis://{}", endpoint),
    }
}

fn connect_error(endpoints: &str, err: redis::RedisError) -> CacheError {
    CacheError::Connect {
        endpoints: endpoints.to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_pack_as_resp() {
        let cmd = to_redis_cmd(&WireCommand::new("SET").arg("k").arg(b"v\r\n"));
        assert_eq!(
            cmd.get_packed_command(),
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$3\r\nv\r\n\r\n".to_vec()
        );
    }

    #[test]
    fn values_convert_to_replies() {
        assert_eq!(into_reply(Value::Nil), Reply::NIL);
        assert_eq!(into_reply(Value::Okay), Reply::ok());
        assert_eq!(into_reply(Value::Int(3)), Reply::Integer(3));
        assert_eq!(
            into_reply(Value::Array(vec![
                Value::BulkString(b"a".to_vec()),
                Value::SimpleString("PONG".into()),
            ])),
            Reply::Array(vec![Reply::bulk("a"), Reply::Simple(b"PONG".to_vec())])
        );
        assert_eq!(
            into_reply(Value::Map(vec![(
                Value::BulkString(b"f".to_vec()),
                Value::Int(1)
            )])),
            Reply::Array(vec![Reply::bulk("f"), Reply::Integer(1)])
        );
    }

    #[test]
    fn urls_are_built_from_endpoints() {
        assert_eq!(node_url("localhost:6379", Some(0)), "redis://localhost:6379");
        assert_eq!(node_url("localhost:6379", Some(3)), "redis://localhost:6379/3");
        assert_eq!(node_url("rediss://cache:6380/2", Some(5)), "rediss://cache:6380/2");
        assert_eq!(node_url("10.0.0.1:7000", None), "redis://10.0.0.1:7000");
    }

    #[test]
    fn transaction_pipeline_is_atomic() {
        let commands = vec![
            WireCommand::new("INCR").arg("n"),
            WireCommand::new("GET").arg("n"),
        ];
        let packed = build_pipeline(&commands, BatchMode::Transaction).get_packed_pipeline();
        let text = String::from_utf8_lossy(&packed);
        assert!(text.starts_with("*1\r\n$5\r\nMULTI\r\n"));
        assert!(text.ends_with("*1\r\n$4\r\nEXEC\r\n"));
    }

    fn raw(bytes: &[u8]) -> Value {
        redis::parse_redis_value(bytes).unwrap()
    }

    #[test]
    fn pipeline_errors_stay_at_their_index() {
        let values = vec![
            raw(b":1\r\n"),
            raw(b"-ERR value is not an integer or out of range\r\n"),
            raw(b"$5\r\nhello\r\n"),
        ];
        let replies = collect_replies("pipeline", 3, BatchMode::Pipeline, values).unwrap();
        assert_eq!(
            replies,
            vec![
                Reply::Integer(1),
                Reply::error("ERR value is not an integer or out of range"),
                Reply::bulk("hello"),
            ]
        );
    }

    #[test]
    fn transaction_errors_stay_at_their_index() {
        let exec = raw(
            b"*2\r\n-WRONGTYPE Operation against a key holding the wrong kind of value\r\n:4\r\n",
        );
        let replies = collect_replies("transaction", 2, BatchMode::Transaction, vec![exec]).unwrap();
        assert_eq!(
            replies[0].error_message().as_deref(),
            Some("WRONGTYPE Operation against a key holding the wrong kind of value")
        );
        assert_eq!(replies[1], Reply::Integer(4));
    }

    #[test]
    fn failed_exec_fails_the_round_trip() {
        let discarded = collect_replies("transaction", 1, BatchMode::Transaction, vec![Value::Nil]);
        assert!(matches!(discarded, Err(CacheError::Backend { .. })));

        let aborted = raw(b"-EXECABORT Transaction discarded because of previous errors.\r\n");
        let err = collect_replies("transaction", 1, BatchMode::Transaction, vec![aborted]).unwrap_err();
        assert!(err.to_string().contains("EXECABORT"));

        let short = collect_replies("pipeline", 2, BatchMode::Pipeline, vec![Value::Int(1)]);
        assert!(matches!(short, Err(CacheError::Backend { .. })));
    }
}
