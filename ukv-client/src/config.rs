//! # Client Configuration
//!
//! Explicit, deserializable configuration objects. Nothing here touches the
//! network; validation happens in `CacheClient::connect`.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use ukv_common::{CacheError, CacheResult};

/// Option key selecting the database index of a single node.
pub const DB_OPTION: &str = "db";

/// Configuration for [`crate::CacheClient`].
///
/// One endpoint selects a single-node backend; more select a cluster.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend addresses, `host:port` or `redis://` URLs.
    pub endpoints: Vec<String>,
    /// Named options; `"db"` is the only one recognized.
    pub options: HashMap<String, String>,
    /// Per-round-trip timeout applied when a call context has no deadline.
    pub default_timeout_ms: Option<u64>,
}

impl ClientConfig {
    /// Config for the given endpoints with no options.
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ClientConfig {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            ..ClientConfig::default()
        }
    }

    /// Parses a JSON document into a config.
    pub fn from_json(text: &str) -> CacheResult<Self> {
        serde_json::from_str(text)
            .map_err(|err| CacheError::Validation(format!("client config: {}", err)))
    }

    /// Sets a named option.
    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    /// Sets the fallback round-trip timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = Some(timeout.as_millis().min(u64::MAX as u128) as u64);
        self
    }

    /// Fallback round-trip timeout, if configured.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }

    /// Database index from the `"db"` option, 0 when absent.
    pub fn db(&self) -> CacheResult<i64> {
        match self.options.get(DB_OPTION) {
            None => Ok(0),
            Some(raw) => raw.trim().parse().map_err(|_| {
                CacheError::Validation(format!("option \"db\" must be an integer, got {:?}", raw))
            }),
        }
    }

    /// Option names other than the recognized ones.
    pub(crate) fn unknown_options(&self) -> impl Iterator<Item = &str> {
        self.options
            .keys()
            .map(String::as_str)
            .filter(|name| *name != DB_OPTION)
    }
}

/// Worker pool settings for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SubscriberOptions {
    /// Handler tasks running concurrently.
    pub workers: usize,
    /// Messages buffered between the receive loop and the workers.
    pub queue_capacity: usize,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        SubscriberOptions {
            workers: 4,
            queue_capacity: 64,
        }
    }
}

impl SubscriberOptions {
    pub(crate) fn validate(&self) -> CacheResult<()> {
        if self.workers == 0 {
            return Err(CacheError::Validation("subscriber needs at least one worker".into()));
        }
        if self.queue_capacity == 0 {
            return Err(CacheError::Validation("subscriber queue capacity must be positive".into()));
        }
        Ok(())
    }
}
