//! # UniKV Client
//!
//! Purpose: One cache-client facade over single-node and clustered
//! Redis-compatible backends, with JSON value round-tripping, batched
//! commands, hash fields, and channel notifications.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `CacheClient` is the single entry point.
//! 2. **Explicit Configuration**: `ClientConfig`, `SubscriberOptions` and
//!    `TelemetryConfig` are plain values; nothing is initialized globally.
//! 3. **Caller-Controlled Time**: Every operation takes a `CallContext`.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use ukv_client::{CacheClient, CallContext, ClientConfig, Command};
//!
//! # async fn run() -> ukv_client::CacheResult<()> {
//! let client = CacheClient::connect(ClientConfig::new(["127.0.0.1:6379"])).await?;
//! let ctx = CallContext::with_timeout(Duration::from_secs(1));
//!
//! client.set(&ctx, "greeting", "hello", Duration::ZERO).await?;
//! let greeting: String = client.get(&ctx, "greeting").await?;
//!
//! let mut batch = client.transaction("session-1");
//! batch.add(Command::increment("visits"))?;
//! batch.add(Command::expire("visits", 1, Duration::from_secs(60)))?;
//! let results = batch.execute(&ctx).await?;
//! # let _ = (greeting, results);
//! # Ok(())
//! # }
//! ```

mod batch;
mod client;
pub mod codec;
mod config;
mod context;
mod hash;
mod pubsub;
mod selector;
pub mod telemetry;

pub use batch::{ArgValue, Batch, Command, CommandKind, CommandResult, ResultValue};
pub use client::CacheClient;
pub use codec::{Shape, TypedValue};
pub use config::{ClientConfig, SubscriberOptions, DB_OPTION};
pub use context::{CallContext, CancelHandle};
pub use hash::FieldValue;
pub use pubsub::{HandlerError, MessageHandler, SubscriptionStats};
pub use selector::{Connector, RedisConnector};
pub use telemetry::TelemetryConfig;

pub use ukv_common::{BatchMode, CacheError, CacheResult, Message, Reply, Topology, TtlStatus};
pub use ukv_engine::{Backend, MemoryBackend, MemoryStore};
