//! # Cache Client
//!
//! Purpose: Expose one operation set over single-node and clustered
//! backends, with typed values, batching, hash fields and pub/sub layered
//! on top in sibling modules.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `CacheClient` hides which driver is in use.
//! 2. **Validate Before Dispatch**: Argument errors never cost a round trip.
//! 3. **Errors Keep Their Meaning**: Server error replies become
//!    `CacheError::Reply`; transport failures stay `CacheError::Backend`.
//! 4. **Cheap Clones**: The driver is shared behind an `Arc`.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use ukv_common::{BatchMode, CacheError, CacheResult, Reply, Topology, TtlStatus, WireCommand};
use ukv_engine::Backend;

use crate::codec::{decode, encode};
use crate::config::ClientConfig;
use crate::context::CallContext;
use crate::selector::{probe, select_backend, Connector, RedisConnector};
use crate::telemetry::instrument;

/// Cache client facade over a backend driver.
#[derive(Debug, Clone)]
pub struct CacheClient {
    backend: Arc<dyn Backend>,
    endpoints: Arc<[String]>,
    default_timeout: Option<Duration>,
}

impl CacheClient {
    /// Connects to the configured endpoints with the Redis drivers.
    pub async fn connect(config: ClientConfig) -> CacheResult<Self> {
        Self::connect_with(config, &RedisConnector).await
    }

    /// Connects through a caller-provided connector.
    ///
    /// Returns `CacheError::Connect` (fatal) when the probe fails.
    pub async fn connect_with(config: ClientConfig, connector: &dyn Connector) -> CacheResult<Self> {
        let backend = select_backend(&config, connector).await?;
        Ok(Self::assemble(backend, &config))
    }

    /// Wraps an already constructed driver, probing it first.
    pub async fn with_backend(backend: Arc<dyn Backend>, config: ClientConfig) -> CacheResult<Self> {
        probe(&config.endpoints, backend.as_ref()).await?;
        Ok(Self::assemble(backend, &config))
    }

    fn assemble(backend: Arc<dyn Backend>, config: &ClientConfig) -> Self {
        CacheClient {
            backend,
            endpoints: config.endpoints.clone().into(),
            default_timeout: config.default_timeout(),
        }
    }

    /// Configured endpoints.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Deployment shape of the connected backend.
    pub fn topology(&self) -> Topology {
        self.backend.topology()
    }

    /// Sends one command; server error replies become `CacheError::Reply`.
    pub(crate) async fn round_trip(&self, ctx: &CallContext, command: WireCommand) -> CacheResult<Reply> {
        let reply = ctx
            .run(self.default_timeout, self.backend.execute(command))
            .await?;
        check_reply(reply)
    }

    /// Sends commands in one round trip; replies are returned as-is.
    pub(crate) async fn round_trip_batch(
        &self,
        ctx: &CallContext,
        commands: Vec<WireCommand>,
        mode: BatchMode,
    ) -> CacheResult<Vec<Reply>> {
        ctx.run(self.default_timeout, self.backend.execute_batch(commands, mode))
            .await
    }

    pub(crate) fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub(crate) fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Probes the backend.
    pub async fn ping(&self, ctx: &CallContext) -> CacheResult<()> {
        instrument("key", "ping", async {
            ctx.run(self.default_timeout, self.backend.ping()).await
        })
        .await
    }

    /// True when `key` exists.
    pub async fn exists(&self, ctx: &CallContext, key: &str) -> CacheResult<bool> {
        instrument("key", "exists", async {
            validate_key(key)?;
            let reply = self.round_trip(ctx, WireCommand::new("EXISTS").arg(key)).await?;
            expect_int("EXISTS", &reply).map(|count| count > 0)
        })
        .await
    }

    /// Deletes a key. Returns true when a key was removed.
    pub async fn delete(&self, ctx: &CallContext, key: &str) -> CacheResult<bool> {
        instrument("key", "delete", async {
            validate_key(key)?;
            let reply = self.round_trip(ctx, WireCommand::new("DEL").arg(key)).await?;
            expect_int("DEL", &reply).map(|count| count > 0)
        })
        .await
    }

    /// Deletes several keys in one transactional round trip.
    ///
    /// Returns the number of keys removed.
    pub async fn delete_many(&self, ctx: &CallContext, keys: &[&str]) -> CacheResult<u64> {
        instrument("key", "delete_many", async {
            for key in keys {
                validate_key(key)?;
            }
            if keys.is_empty() {
                return Ok(0);
            }
            let commands = keys
                .iter()
                .map(|key| WireCommand::new("DEL").arg(key))
                .collect();
            let replies = self
                .round_trip_batch(ctx, commands, BatchMode::Transaction)
                .await?;
            let mut removed = 0;
            for reply in replies {
                removed += expect_int("DEL", &check_reply(reply)?)?.max(0) as u64;
            }
            Ok(removed)
        })
        .await
    }

    /// Sets a key's time-to-live. Returns false when the key is missing.
    pub async fn expire(&self, ctx: &CallContext, key: &str, ttl: Duration) -> CacheResult<bool> {
        instrument("key", "expire", async {
            validate_key(key)?;
            let millis = ttl_millis(ttl)?
                .ok_or_else(|| CacheError::Validation("expire needs a non-zero ttl".into()))?;
            let reply = self
                .round_trip(ctx, WireCommand::new("PEXPIRE").arg(key).arg(millis.to_string()))
                .await?;
            expect_int("PEXPIRE", &reply).map(|set| set == 1)
        })
        .await
    }

    /// Remaining time-to-live of a key.
    pub async fn ttl(&self, ctx: &CallContext, key: &str) -> CacheResult<TtlStatus> {
        instrument("key", "ttl", async {
            validate_key(key)?;
            let reply = self.round_trip(ctx, WireCommand::new("PTTL").arg(key)).await?;
            expect_int("PTTL", &reply).map(TtlStatus::from_pttl)
        })
        .await
    }

    /// Stores `value` only when `key` is absent. Returns true when stored.
    pub async fn set_if_absent<T>(
        &self,
        ctx: &CallContext,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<bool>
    where
        T: Serialize + ?Sized,
    {
        instrument("key", "set_if_absent", async {
            validate_key(key)?;
            let ttl = ttl_millis(ttl)?;
            let mut command = WireCommand::new("SET").arg(key).arg(encode(value)?).arg("NX");
            if let Some(millis) = ttl {
                command = command.arg("PX").arg(millis.to_string());
            }
            let reply = self.round_trip(ctx, command).await?;
            Ok(!reply.is_nil())
        })
        .await
    }

    /// Reads several keys at once; missing keys are `None`.
    pub async fn get_many<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        keys: &[&str],
    ) -> CacheResult<Vec<Option<T>>> {
        instrument("key", "get_many", async {
            for key in keys {
                validate_key(key)?;
            }
            if keys.is_empty() {
                return Ok(Vec::new());
            }
            let reply = self.round_trip(ctx, WireCommand::new("MGET").args(keys)).await?;
            let items = match reply {
                Reply::Array(items) => items,
                other => return Err(unexpected("MGET", &other)),
            };
            items
                .into_iter()
                .map(|item| match item {
                    Reply::Bulk(Some(bytes)) => decode(&bytes).map(Some),
                    Reply::Bulk(None) => Ok(None),
                    other => Err(unexpected("MGET", &other)),
                })
                .collect()
        })
        .await
    }

    /// One page of a key scan. A returned cursor of 0 ends the scan.
    pub async fn scan_keys(
        &self,
        ctx: &CallContext,
        pattern: &str,
        cursor: u64,
        count: u32,
    ) -> CacheResult<(Vec<String>, u64)> {
        instrument("key", "scan_keys", async {
            let mut command = WireCommand::new("SCAN").arg(cursor.to_string());
            if !pattern.is_empty() {
                command = command.arg("MATCH").arg(pattern);
            }
            if count > 0 {
                command = command.arg("COUNT").arg(count.to_string());
            }
            let reply = self.round_trip(ctx, command).await?;
            parse_scan(&reply).ok_or_else(|| unexpected("SCAN", &reply))
        })
        .await
    }

    /// Renames `from` to `to`, replacing any existing `to`.
    pub async fn rename(&self, ctx: &CallContext, from: &str, to: &str) -> CacheResult<()> {
        instrument("key", "rename", async {
            validate_key(from)?;
            validate_key(to)?;
            self.round_trip(ctx, WireCommand::new("RENAME").arg(from).arg(to))
                .await
                .map(|_| ())
        })
        .await
    }

    /// Length in bytes of the stored value, 0 when missing.
    pub async fn str_len(&self, ctx: &CallContext, key: &str) -> CacheResult<u64> {
        instrument("key", "str_len", async {
            validate_key(key)?;
            let reply = self.round_trip(ctx, WireCommand::new("STRLEN").arg(key)).await?;
            expect_int("STRLEN", &reply).map(|len| len.max(0) as u64)
        })
        .await
    }

    /// Backend type name of a key ("string", "hash", "zset", ... or "none").
    pub async fn key_type(&self, ctx: &CallContext, key: &str) -> CacheResult<String> {
        instrument("key", "key_type", async {
            validate_key(key)?;
            let reply = self.round_trip(ctx, WireCommand::new("TYPE").arg(key)).await?;
            reply.as_text().ok_or_else(|| unexpected("TYPE", &reply))
        })
        .await
    }

    /// Server-side description of a key (`DEBUG OBJECT`).
    ///
    /// A missing key is reported by the server as a `Reply` error.
    pub async fn debug_object(&self, ctx: &CallContext, key: &str) -> CacheResult<String> {
        instrument("key", "debug_object", async {
            validate_key(key)?;
            let reply = self
                .round_trip(ctx, WireCommand::new("DEBUG").arg("OBJECT").arg(key))
                .await?;
            reply.as_text().ok_or_else(|| unexpected("DEBUG OBJECT", &reply))
        })
        .await
    }
}

/// Rejects empty keys before any round trip.
pub(crate) fn validate_key(key: &str) -> CacheResult<()> {
    if key.is_empty() {
        return Err(CacheError::Validation("key must not be empty".into()));
    }
    Ok(())
}

/// Converts a TTL into milliseconds; zero means "no expiration".
pub(crate) fn ttl_millis(ttl: Duration) -> CacheResult<Option<u64>> {
    if ttl.is_zero() {
        return Ok(None);
    }
    let millis = ttl.as_millis();
    if millis == 0 {
        return Err(CacheError::Validation(format!(
            "ttl {:?} is below the 1ms resolution",
            ttl
        )));
    }
    if millis > i64::MAX as u128 {
        return Err(CacheError::Validation(format!("ttl {:?} is too large", ttl)));
    }
    Ok(Some(millis as u64))
}

/// Maps a server error reply to `CacheError::Reply`.
pub(crate) fn check_reply(reply: Reply) -> CacheResult<Reply> {
    match reply.error_message() {
        Some(message) => Err(CacheError::Reply(message)),
        None => Ok(reply),
    }
}

pub(crate) fn expect_int(op: &str, reply: &Reply) -> CacheResult<i64> {
    match reply {
        Reply::Integer(value) => Ok(*value),
        other => Err(unexpected(op, other)),
    }
}

pub(crate) fn unexpected(op: &str, reply: &Reply) -> CacheError {
    CacheError::backend(op, format!("unexpected reply {:?}", reply))
}

fn parse_scan(reply: &Reply) -> Option<(Vec<String>, u64)> {
    let Reply::Array(parts) = reply else {
        return None;
    };
    let [cursor, Reply::Array(keys)] = parts.as_slice() else {
        return None;
    };
    let cursor = cursor.as_text()?.parse().ok()?;
    let keys = keys.iter().map(Reply::as_text).collect::<Option<Vec<_>>>()?;
    Some((keys, cursor))
}
