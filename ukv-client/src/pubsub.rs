//! # Key-space Pub/Sub
//!
//! Purpose: Deliver channel messages to a caller handler through a bounded
//! queue and a fixed worker pool, and publish messages with receiver
//! accounting.
//!
//! ## Design Principles
//! 1. **Bounded Dispatch**: The receive loop feeds an `mpsc` queue of fixed
//!    capacity; a full queue slows the loop down instead of growing memory.
//! 2. **Failure Containment**: Handler errors and panics are logged and
//!    counted; they never stop a worker or the subscription.
//! 3. **Caller-Controlled Lifetime**: The loop ends when the backend closes
//!    the stream or the call context is cancelled or expires.
//!
//! ## Structure Overview
//!
//! ```text
//! backend stream ──► receive loop ──► mpsc(queue_capacity) ──► worker × N ──► handler
//!                        ▲
//!                 ctx cancel / deadline
//! ```

use std::error::Error;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use ukv_common::{CacheError, CacheResult, Message};

use crate::client::CacheClient;
use crate::codec::encode;
use crate::config::SubscriberOptions;
use crate::context::CallContext;
use crate::telemetry::instrument;

/// Error type handlers may return.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Processes messages delivered to a subscription.
///
/// Implemented for any `Fn(Message) -> impl Future<Output = Result<(), E>>`.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: Message) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut, E> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<HandlerError> + 'static,
{
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        (self)(message).await.map_err(Into::into)
    }
}

/// Counters reported when a subscription ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Messages read from the backend stream.
    pub received: u64,
    /// Messages the handler accepted.
    pub handled: u64,
    /// Messages the handler rejected.
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    handled: AtomicU64,
    failed: AtomicU64,
}

impl CacheClient {
    /// Subscribes to `channel` and runs `handler` for every message.
    ///
    /// Returns the delivery counters once the backend closes the stream.
    /// Returns `Cancelled` or `DeadlineExceeded` when `ctx` fires first.
    pub async fn subscribe<H: MessageHandler>(
        &self,
        ctx: &CallContext,
        channel: &str,
        options: SubscriberOptions,
        handler: H,
    ) -> CacheResult<SubscriptionStats> {
        instrument("pubsub", "subscribe", async {
            if channel.is_empty() {
                return Err(CacheError::Validation("channel must not be empty".into()));
            }
            options.validate()?;

            let mut stream = ctx
                .run(self.default_timeout(), self.backend().subscribe(channel))
                .await?;
            tracing::info!(channel, workers = options.workers, "subscribed");

            let (sender, receiver) = mpsc::channel::<Message>(options.queue_capacity);
            let receiver = Arc::new(Mutex::new(receiver));
            let handler = Arc::new(handler);
            let counters = Arc::new(Counters::default());
            let mut workers = JoinSet::new();
            for _ in 0..options.workers {
                workers.spawn(run_worker(
                    Arc::clone(&receiver),
                    Arc::clone(&handler),
                    Arc::clone(&counters),
                ));
            }

            let mut received = 0u64;
            let outcome = loop {
                let message = tokio::select! {
                    err = ctx.interrupted() => break Err(err),
                    next = stream.next() => match next {
                        Some(message) => message,
                        None => break Ok(()),
                    },
                };
                received += 1;
                tokio::select! {
                    err = ctx.interrupted() => break Err(err),
                    sent = sender.send(message) => {
                        if sent.is_err() {
                            break Ok(());
                        }
                    }
                }
            };
            drop(sender);

            match outcome {
                Ok(()) => {
                    // Workers drain the queue before exiting.
                    while let Some(joined) = workers.join_next().await {
                        if let Err(err) = joined {
                            tracing::error!(channel, error = %err, "subscription worker panicked");
                        }
                    }
                    let stats = SubscriptionStats {
                        received,
                        handled: counters.handled.load(Ordering::Relaxed),
                        failed: counters.failed.load(Ordering::Relaxed),
                    };
                    tracing::info!(channel, received, failed = stats.failed, "subscription closed");
                    Ok(stats)
                }
                Err(err) => {
                    workers.abort_all();
                    tracing::info!(channel, reason = %err, "subscription stopped");
                    Err(err)
                }
            }
        })
        .await
    }

    /// Publishes `payload` on `channel`. Returns the number of receivers.
    ///
    /// Fails with `NoSubscribers` when nobody received the message.
    pub async fn publish(&self, ctx: &CallContext, channel: &str, payload: impl AsRef<[u8]>) -> CacheResult<u64> {
        instrument("pubsub", "publish", async {
            self.publish_bytes(ctx, channel, payload.as_ref()).await
        })
        .await
    }

    /// Encodes `value` with the codec and publishes it.
    pub async fn publish_json<T>(&self, ctx: &CallContext, channel: &str, value: &T) -> CacheResult<u64>
    where
        T: Serialize + ?Sized,
    {
        instrument("pubsub", "publish_json", async {
            let payload = encode(value)?;
            self.publish_bytes(ctx, channel, &payload).await
        })
        .await
    }

    async fn publish_bytes(&self, ctx: &CallContext, channel: &str, payload: &[u8]) -> CacheResult<u64> {
        if channel.is_empty() {
            return Err(CacheError::Validation("channel must not be empty".into()));
        }
        let receivers = ctx
            .run(self.default_timeout(), self.backend().publish(channel, payload))
            .await?;
        if receivers == 0 {
            return Err(CacheError::NoSubscribers {
                channel: channel.to_string(),
            });
        }
        Ok(receivers)
    }
}

async fn run_worker<H: MessageHandler>(
    receiver: Arc<Mutex<mpsc::Receiver<Message>>>,
    handler: Arc<H>,
    counters: Arc<Counters>,
) {
    loop {
        let message = receiver.lock().await.recv().await;
        let Some(message) = message else {
            return;
        };
        let channel = message.channel.clone();
        // A panicking handler must not take its worker down with it.
        match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
            Ok(Ok(())) => {
                counters.handled.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(err)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(channel = %channel, error = %err, "message handler failed");
            }
            Err(panic) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(channel = %channel, panic = panic_message(&*panic), "message handler panicked");
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(text) = panic.downcast_ref::<&'static str>() {
        text
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use ukv_engine::MemoryBackend;

    use crate::config::ClientConfig;

    async fn client() -> (Arc<MemoryBackend>, CacheClient) {
        let backend = Arc::new(MemoryBackend::new());
        let client = CacheClient::with_backend(backend.clone(), ClientConfig::new(["memory"]))
            .await
            .unwrap();
        (backend, client)
    }

    async fn wait_for_subscriber(backend: &MemoryBackend, channel: &str) {
        for _ in 0..200 {
            if backend.subscriber_count(channel) > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no subscriber on {}", channel);
    }

    #[tokio::test]
    async fn handler_failures_are_counted() {
        let (backend, client) = client().await;
        let task = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .subscribe(
                        &CallContext::background(),
                        "jobs",
                        SubscriberOptions {
                            workers: 2,
                            queue_capacity: 1,
                        },
                        |message: Message| async move {
                            if message.payload.as_ref() == b"bad" {
                                return Err("rejected");
                            }
                            Ok(())
                        },
                    )
                    .await
            }
        });
        wait_for_subscriber(&backend, "jobs").await;

        let ctx = CallContext::background();
        for payload in ["a", "bad", "b"] {
            client.publish(&ctx, "jobs", payload).await.unwrap();
        }
        backend.close_subscriptions();

        let stats = task.await.unwrap().unwrap();
        assert_eq!(
            stats,
            SubscriptionStats {
                received: 3,
                handled: 2,
                failed: 1
            }
        );
    }

    #[tokio::test]
    async fn panicking_handler_keeps_its_worker() {
        let (backend, client) = client().await;
        let task = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .subscribe(
                        &CallContext::background(),
                        "jobs",
                        SubscriberOptions {
                            workers: 1,
                            queue_capacity: 1,
                        },
                        |message: Message| async move {
                            if message.payload.as_ref() == b"boom" {
                                panic!("handler exploded");
                            }
                            Ok::<(), HandlerError>(())
                        },
                    )
                    .await
            }
        });
        wait_for_subscriber(&backend, "jobs").await;

        let ctx = CallContext::background();
        for payload in ["boom", "a", "b", "c", "d"] {
            client.publish(&ctx, "jobs", payload).await.unwrap();
        }
        backend.close_subscriptions();

        let stats = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("subscription ended after the stream closed")
            .unwrap()
            .unwrap();
        assert_eq!(
            stats,
            SubscriptionStats {
                received: 5,
                handled: 4,
                failed: 1
            }
        );
    }

    #[test]
    fn panic_payloads_are_readable() {
        assert_eq!(panic_message(&"static text"), "static text");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&7u8), "non-string panic payload");
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let (backend, client) = client().await;
        let (ctx, handle) = CallContext::cancellable();
        let task = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .subscribe(&ctx, "idle", SubscriberOptions::default(), |_: Message| async {
                        Ok::<(), HandlerError>(())
                    })
                    .await
            }
        });
        wait_for_subscriber(&backend, "idle").await;
        handle.cancel();
        assert_eq!(task.await.unwrap(), Err(CacheError::Cancelled));
    }

    #[tokio::test]
    async fn empty_channel_is_rejected() {
        let (_, client) = client().await;
        let err = client
            .publish(&CallContext::background(), "", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Validation(_)));
    }
}
