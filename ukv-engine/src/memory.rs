//! # In-Memory Backend
//!
//! Provide an in-process backend with sharded locking, TTL-aware lookups,
//! and a pub/sub hub, speaking the same driver interface as the Redis drivers.
//!
//! ## Usage
//!
//! - Use `MemoryBackend::new()` for a single-node flavoured backend, or
//!   `MemoryBackend::with_topology(Topology::Cluster)` to stand in for a
//!   cluster in tests.
//! - Use `MemoryStore::start_expirer` to enable active TTL cleanup in the
//!   background; expiration is always enforced on access regardless.
//! - Use `set_offline(true)` to make every round trip fail, which is how
//!   tests exercise transport failures.
//!
//! ## Design Principles
//!
//! 1. **Sharded Locks**: Per-shard locks reduce contention under concurrency.
//! 2. **Typed Entries**: Strings, hashes, and sorted sets live side by side;
//!    operating on the wrong kind yields the Redis `WRONGTYPE` reply.
//! 3. **Bytes-backed Buffers**: Values are `Bytes` so reads do not copy.
//! 4. **TTL Fast Path**: Expiration is checked on access for O(1) reads.
//! 5. **Strategy Pattern**: Implements `Backend` to keep callers decoupled.
//!
//! ## Structure Overview
//!
//! ```text
//! MemoryBackend
//!   ├── store: Arc<MemoryStore>
//!   │     └── shards: Vec<Shard>
//!   │           └── inner: RwLock<HashMap<Bytes, Entry>>
//!   │                 └── Entry { data: Data, expires_at }
//!   ├── gate: RwLock<()>          (exclusive for transactions)
//!   └── channels: Mutex<HashMap<String, Vec<UnboundedSender<Message>>>>
//! ```

use std::hash::{BuildHasher, Hasher};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ahash::RandomState;
use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc::{self, UnboundedSender};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

use ukv_common::{
    BatchMode, CacheError, CacheResult, Message, Reply, Topology, WireCommand,
};

use crate::backend::{Backend, MessageStream};
use crate::dispatch::dispatch;

/// Default shards = CPU count * multiplier to reduce lock contention.
const DEFAULT_SHARD_MULTIPLIER: usize = 4;

/// Value stored under a key.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Data {
    Str(Bytes),
    Hash(HashMap<Bytes, Bytes>),
    ZSet(SortedSet),
}

impl Data {
    /// Redis `TYPE` name for this value.
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Data::Str(_) => "string",
            Data::Hash(_) => "hash",
            Data::ZSet(_) => "zset",
        }
    }
}

/// Sorted set keyed by member; ordering is computed on range queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SortedSet {
    scores: HashMap<Bytes, f64>,
}

impl SortedSet {
    /// Adds or updates a member. Returns true when the member is new.
    pub(crate) fn insert(&mut self, member: Bytes, score: f64) -> bool {
        self.scores.insert(member, score).is_none()
    }

    pub(crate) fn len(&self) -> usize {
        self.scores.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Members ordered by (score, member), as Redis orders them.
    pub(crate) fn ordered(&self) -> Vec<(Bytes, f64)> {
        let mut members: Vec<(Bytes, f64)> = self
            .scores
            .iter()
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        members
    }

    /// Removes members whose score matches. Returns the count.
    pub(crate) fn remove_where(&mut self, mut matches: impl FnMut(f64) -> bool) -> usize {
        let before = self.scores.len();
        self.scores.retain(|_, score| !matches(*score));
        before - self.scores.len()
    }
}

/// Internal entry: value plus absolute expiration.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) data: Data,
    pub(crate) expires_at: Option<Instant>,
}

impl Entry {
    pub(crate) fn new(data: Data) -> Self {
        Entry {
            data,
            expires_at: None,
        }
    }

    /// Returns true when the entry has expired at `now`.
    fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

/// Per-shard lock wrapper.
#[derive(Debug)]
struct Shard {
    inner: RwLock<HashMap<Bytes, Entry, RandomState>>,
}

/// Sharded key space used by the in-memory backend.
#[derive(Debug)]
pub struct MemoryStore {
    /// Per-shard storage.
    shards: Vec<Shard>,
    /// Bitmask for fast shard selection (power-of-two shard count).
    shard_mask: usize,
    /// Hash state used to pick shards deterministically.
    hash_state: RandomState,
}

/// Handle for the background expiration sweeper.
///
/// Call `stop` to signal shutdown and join the thread.
pub struct ExpirationHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ExpirationHandle {
    /// Stops the sweeper and waits for the thread to finish.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates a store with a default shard count based on CPU parallelism.
    pub fn new() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1);
        Self::with_shard_count(threads.saturating_mul(DEFAULT_SHARD_MULTIPLIER))
    }

    /// Creates a store with a caller-provided shard count.
    ///
    /// The count is normalized to the next power of two to enable fast masking.
    pub fn with_shard_count(shards: usize) -> Self {
        let shard_count = normalize_shard_count(shards);
        let hash_state = RandomState::new();
        let shards = (0..shard_count)
            .map(|_| Shard {
                inner: RwLock::new(HashMap::with_hasher(hash_state.clone())),
            })
            .collect();

        MemoryStore {
            shards,
            shard_mask: shard_count - 1,
            hash_state,
        }
    }

    /// Runs `f` against the live entry for `key`, if any, without mutating.
    pub(crate) fn read<R>(&self, key: &[u8], f: impl FnOnce(Option<&Entry>) -> R) -> R {
        let now = Instant::now();
        let inner = self.shard_for(key).inner.read();
        f(inner.get(key).filter(|entry| !entry.is_expired(now)))
    }

    /// Runs `f` with exclusive access to the slot for `key`.
    ///
    /// Expired entries are presented as `None`. Leaving `None` in the slot
    /// deletes the key.
    pub(crate) fn update<R>(&self, key: &[u8], f: impl FnOnce(&mut Option<Entry>) -> R) -> R {
        let now = Instant::now();
        let mut inner = self.shard_for(key).inner.write();
        let mut slot = inner.remove(key).filter(|entry| !entry.is_expired(now));
        let out = f(&mut slot);
        if let Some(entry) = slot {
            inner.insert(Bytes::copy_from_slice(key), entry);
        }
        out
    }

    /// Removes and returns the live entry for `key`.
    pub(crate) fn take(&self, key: &[u8]) -> Option<Entry> {
        self.update(key, |slot| slot.take())
    }

    /// Stores `entry` under `key`, replacing any previous value.
    pub(crate) fn put(&self, key: &[u8], entry: Entry) {
        self.update(key, |slot| *slot = Some(entry));
    }

    /// Returns every live key in byte order.
    pub(crate) fn keys(&self) -> Vec<Bytes> {
        let now = Instant::now();
        let mut keys = Vec::new();
        for shard in &self.shards {
            let inner = shard.inner.read();
            keys.extend(
                inner
                    .iter()
                    .filter(|(_, entry)| !entry.is_expired(now))
                    .map(|(key, _)| key.clone()),
            );
        }
        keys.sort();
        keys
    }

    /// Removes expired entries across all shards.
    ///
    /// This is an O(n) scan and is intended for a periodic background sweep.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut inner = shard.inner.write();
            let before = inner.len();
            inner.retain(|_, entry| !entry.is_expired(now));
            removed += before - inner.len();
        }
        removed
    }

    /// Starts a background thread that periodically removes expired entries.
    ///
    /// The returned handle must be stopped to avoid leaking the thread.
    pub fn start_expirer(self: &Arc<Self>, interval: Duration) -> ExpirationHandle {
        let interval = if interval.is_zero() {
            Duration::from_millis(1)
        } else {
            interval
        };

        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let store = Arc::clone(self);

        let join = std::thread::spawn(move || {
            while !stop_thread.load(Ordering::Acquire) {
                std::thread::sleep(interval);
                let removed = store.purge_expired(Instant::now());
                if removed > 0 {
                    tracing::trace!(removed, "purged expired entries");
                }
            }
        });

        ExpirationHandle {
            stop,
            join: Some(join),
        }
    }

    /// Hashes a key to its owning shard index.
    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = self.hash_state.build_hasher();
        hasher.write(key);
        (hasher.finish() as usize) & self.shard_mask
    }

    fn shard_for(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }
}

/// In-process backend implementing the driver interface.
#[derive(Debug)]
pub struct MemoryBackend {
    store: Arc<MemoryStore>,
    topology: Topology,
    /// Shared for single commands, exclusive for transactions.
    gate: RwLock<()>,
    offline: AtomicBool,
    round_trips: AtomicU64,
    channels: Mutex<HashMap<String, Vec<UnboundedSender<Message>>>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates a single-node flavoured backend with a fresh store.
    pub fn new() -> Self {
        Self::with_topology(Topology::SingleNode)
    }

    /// Creates a backend that reports the given topology.
    pub fn with_topology(topology: Topology) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), topology)
    }

    /// Creates a backend over an existing store.
    pub fn with_store(store: Arc<MemoryStore>, topology: Topology) -> Self {
        MemoryBackend {
            store,
            topology,
            gate: RwLock::new(()),
            offline: AtomicBool::new(false),
            round_trips: AtomicU64::new(0),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Underlying key space.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// When offline, every round trip fails with a backend error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Number of round trips served so far (failed ones included).
    pub fn round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::Relaxed)
    }

    /// Number of open subscriptions on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let mut channels = self.channels.lock();
        match channels.get_mut(channel) {
            Some(senders) => {
                senders.retain(|sender| !sender.is_closed());
                senders.len()
            }
            None => 0,
        }
    }

    /// Ends every open subscription stream, as a server disconnect would.
    pub fn close_subscriptions(&self) {
        self.channels.lock().clear();
    }

    /// Counts a round trip and fails it when offline.
    fn begin(&self, op: &str) -> CacheResult<()> {
        self.round_trips.fetch_add(1, Ordering::Relaxed);
        if self.offline.load(Ordering::Acquire) {
            return Err(CacheError::backend(op, "connection refused (backend offline)"));
        }
        Ok(())
    }

    fn deliver(&self, channel: &str, payload: &[u8]) -> u64 {
        let mut channels = self.channels.lock();
        let Some(senders) = channels.get_mut(channel) else {
            return 0;
        };
        let message = Message::new(channel, Bytes::copy_from_slice(payload));
        senders.retain(|sender| sender.unbounded_send(message.clone()).is_ok());
        senders.len() as u64
    }

    fn run(&self, command: &WireCommand) -> Reply {
        if command.name() == "PUBLISH" {
            return match command.arguments() {
                [channel, payload] => {
                    let channel = String::from_utf8_lossy(channel);
                    Reply::Integer(self.deliver(&channel, payload) as i64)
                }
                _ => Reply::error("ERR wrong number of arguments for 'publish' command"),
            };
        }
        dispatch(command, &self.store)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn topology(&self) -> Topology {
        self.topology
    }

    async fn ping(&self) -> CacheResult<()> {
        self.begin("ping")
    }

    async fn execute(&self, command: WireCommand) -> CacheResult<Reply> {
        self.begin(command.name())?;
        let _shared = self.gate.read();
        Ok(self.run(&command))
    }

    async fn execute_batch(
        &self,
        commands: Vec<WireCommand>,
        mode: BatchMode,
    ) -> CacheResult<Vec<Reply>> {
        self.begin(match mode {
            BatchMode::Pipeline => "pipeline",
            BatchMode::Transaction => "transaction",
        })?;
        match mode {
            BatchMode::Pipeline => Ok(commands
                .iter()
                .map(|command| {
                    let _shared = self.gate.read();
                    self.run(command)
                })
                .collect()),
            BatchMode::Transaction => {
                let _exclusive = self.gate.write();
                Ok(commands.iter().map(|command| self.run(command)).collect())
            }
        }
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> CacheResult<u64> {
        self.begin("publish")?;
        Ok(self.deliver(channel, payload))
    }

    async fn subscribe(&self, channel: &str) -> CacheResult<MessageStream> {
        self.begin("subscribe")?;
        let (sender, receiver) = mpsc::unbounded();
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(sender);
        Ok(Box::pin(receiver))
    }
}

/// Normalizes shard counts to a power of two for fast masking.
fn normalize_shard_count(count: usize) -> usize {
    count.max(1).next_power_of_two()
}
