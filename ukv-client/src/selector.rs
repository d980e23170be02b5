//! # Backend Selector
//!
//! Purpose: Turn a [`ClientConfig`] into a connected, probed backend driver.
//!
//! ## Design Principles
//! 1. **Topology by Count**: One endpoint is a single node, more are a
//!    cluster.
//! 2. **Pluggable Connectors**: The [`Connector`] trait is the seam between
//!    selection and driver construction; tests substitute their own.
//! 3. **Probe Once**: A `PING` at construction decides whether the client is
//!    usable; failure is the one fatal error.

use std::sync::Arc;

use async_trait::async_trait;

use ukv_common::{CacheError, CacheResult};
use ukv_engine::{Backend, RedisBackend, RedisClusterBackend};

use crate::config::ClientConfig;

/// Builds backend drivers for the selector.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects to one node using database index `db`.
    async fn connect_single(&self, endpoint: &str, db: i64) -> CacheResult<Arc<dyn Backend>>;

    /// Connects to a cluster through its seed endpoints.
    async fn connect_cluster(&self, endpoints: &[String]) -> CacheResult<Arc<dyn Backend>>;
}

/// Production connector backed by the `redis` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisConnector;

#[async_trait]
impl Connector for RedisConnector {
    async fn connect_single(&self, endpoint: &str, db: i64) -> CacheResult<Arc<dyn Backend>> {
        Ok(Arc::new(RedisBackend::connect(endpoint, db).await?))
    }

    async fn connect_cluster(&self, endpoints: &[String]) -> CacheResult<Arc<dyn Backend>> {
        Ok(Arc::new(RedisClusterBackend::connect(endpoints).await?))
    }
}

/// Validates `config`, connects through `connector`, and probes the result.
pub(crate) async fn select_backend(
    config: &ClientConfig,
    connector: &dyn Connector,
) -> CacheResult<Arc<dyn Backend>> {
    let endpoints = &config.endpoints;
    if endpoints.is_empty() || endpoints.iter().any(|endpoint| endpoint.trim().is_empty()) {
        return Err(CacheError::Validation("at least one non-empty endpoint is required".into()));
    }
    for name in config.unknown_options() {
        tracing::debug!(option = name, "ignoring unrecognized client option");
    }

    let connected = if endpoints.len() > 1 {
        tracing::debug!(nodes = endpoints.len(), "selecting cluster backend");
        connector.connect_cluster(endpoints).await
    } else {
        let db = config.db()?;
        tracing::debug!(endpoint = %endpoints[0], db, "selecting single-node backend");
        connector.connect_single(&endpoints[0], db).await
    };
    let backend = connected.map_err(|err| fatal(endpoints, err))?;
    probe(endpoints, backend.as_ref()).await?;
    Ok(backend)
}

/// Runs the connectivity probe against a freshly built backend.
pub(crate) async fn probe(endpoints: &[String], backend: &dyn Backend) -> CacheResult<()> {
    backend.ping().await.map_err(|err| fatal(endpoints, err))?;
    tracing::info!(topology = %backend.topology(), "cache backend ready");
    Ok(())
}

fn fatal(endpoints: &[String], err: CacheError) -> CacheError {
    let err = match err {
        CacheError::Connect { .. } => err,
        other => CacheError::Connect {
            endpoints: endpoints.join(","),
            message: other.to_string(),
        },
    };
    tracing::error!(error = %err, "cache backend unavailable");
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use ukv_common::Topology;
    use ukv_engine::MemoryBackend;

    struct OfflineConnector;

    #[async_trait]
    impl Connector for OfflineConnector {
        async fn connect_single(&self, _: &str, _: i64) -> CacheResult<Arc<dyn Backend>> {
            let backend = MemoryBackend::new();
            backend.set_offline(true);
            Ok(Arc::new(backend))
        }

        async fn connect_cluster(&self, _: &[String]) -> CacheResult<Arc<dyn Backend>> {
            Ok(Arc::new(MemoryBackend::with_topology(Topology::Cluster)))
        }
    }

    #[tokio::test]
    async fn empty_endpoints_are_rejected() {
        let err = select_backend(&ClientConfig::default(), &OfflineConnector)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Validation(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn failed_probe_is_fatal() {
        let config = ClientConfig::new(["127.0.0.1:6379"]);
        let err = select_backend(&config, &OfflineConnector).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("127.0.0.1:6379"));
    }

    #[tokio::test]
    async fn cluster_path_for_many_endpoints() {
        let config = ClientConfig::new(["a:1", "b:2"]);
        let backend = select_backend(&config, &OfflineConnector).await.unwrap();
        assert_eq!(backend.topology(), Topology::Cluster);
    }

    #[tokio::test]
    async fn bad_db_option_is_validation() {
        let config = ClientConfig::new(["a:1"]).with_option("db", "x");
        let err = select_backend(&config, &OfflineConnector).await.unwrap_err();
        assert!(matches!(err, CacheError::Validation(_)));
    }
}
