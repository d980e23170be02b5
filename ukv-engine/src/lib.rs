//! # UniKV Backend Drivers
//!
//! Purpose: Execute wire commands against a key-value backend, whether a
//! single Redis node, a Redis Cluster, or the in-process store used for
//! embedding and tests.
//!
//! ## Design Principles
//! 1. **One Interface**: Every driver implements `Backend`.
//! 2. **Round Trips Are Explicit**: Batches go out in one round trip and come
//!    back as index-aligned replies.
//! 3. **Wire-Compatible Store**: The in-memory backend answers with the same
//!    replies and error texts Redis does.

mod backend;
mod dispatch;
mod memory;
mod redis_driver;

pub use backend::{Backend, MessageStream};
pub use memory::{ExpirationHandle, MemoryBackend, MemoryStore};
pub use redis_driver::{RedisBackend, RedisClusterBackend};
