//! # Backend Driver Interface
//!
//! Purpose: The minimal capability set every backend satisfies, so the
//! client facade is written once for single-node and clustered stores.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: The facade holds an `Arc<dyn Backend>` and never
//!    knows which driver sits behind it.
//! 2. **Round-Trip Granularity**: One method call is one round trip; a failed
//!    call means the whole round trip failed.
//! 3. **Errors Are Data**: Per-command server errors come back inside the
//!    reply list as `Reply::Error`, never as a failed round trip.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use ukv_common::{BatchMode, CacheResult, Message, Reply, Topology, WireCommand};

/// Stream of pub/sub messages. Ends when the backend closes the subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = Message> + Send>>;

/// Driver capability set shared by single-node and clustered backends.
///
/// Implementations must support concurrent callers; the facade holds no
/// locks of its own.
#[async_trait]
pub trait Backend: Send + Sync + fmt::Debug {
    /// Deployment shape behind this driver.
    fn topology(&self) -> Topology;

    /// Connectivity probe.
    async fn ping(&self) -> CacheResult<()>;

    /// Sends one command and returns its reply.
    ///
    /// A server error reply is returned as `Ok(Reply::Error(..))`.
    async fn execute(&self, command: WireCommand) -> CacheResult<Reply>;

    /// Sends all commands in one round trip and returns one reply per command,
    /// index-aligned with `commands`.
    async fn execute_batch(
        &self,
        commands: Vec<WireCommand>,
        mode: BatchMode,
    ) -> CacheResult<Vec<Reply>>;

    /// Publishes a payload and returns the number of receivers.
    async fn publish(&self, channel: &str, payload: &[u8]) -> CacheResult<u64>;

    /// Subscribes to a channel.
    async fn subscribe(&self, channel: &str) -> CacheResult<MessageStream>;
}
