//! CLI command implementations

pub mod predict;
pub mod show;
pub mod stream;
pub mod sync;
pub mod train;

use anyhow::{bail, Context, Result};
use featuresync_core::{CustomerId, FeatureStore, RawEvent};
use featuresync_offline::{ColumnMapping, ResultMaterializer};
use featuresync_online::{FeatureStoreClient, InMemoryFeatureStore, SqliteFeatureStore};
use std::path::Path;
use std::sync::Arc;

use crate::config::CliConfig;

/// Open the online store named by `url` and check that it answers
///
/// Supported schemes: `sqlite://<path>`, `redis://<host>:<port>`, `memory://`.
pub async fn open_store(url: &str) -> Result<Arc<dyn FeatureStore>> {
    let store = connect_store(url).await?;
    ensure_healthy(store, url).await
}

async fn ensure_healthy(store: Arc<dyn FeatureStore>, url: &str) -> Result<Arc<dyn FeatureStore>> {
    store
        .health_check()
        .await
        .with_context(|| format!("Online store at {} failed its health check", url))?;
    tracing::debug!(url = %url, store_type = store.store_type(), "Online store is healthy");
    Ok(store)
}

async fn connect_store(url: &str) -> Result<Arc<dyn FeatureStore>> {
    if let Some(path) = url.strip_prefix("sqlite://") {
        if path.is_empty() {
            bail!("sqlite:// URL needs a database path, e.g. sqlite://.featuresync/online.db");
        }
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let store = SqliteFeatureStore::open(path)
            .with_context(|| format!("Failed to open SQLite store at {}", path))?;
        return Ok(Arc::new(store));
    }

    if url.starts_with("memory://") {
        return Ok(Arc::new(InMemoryFeatureStore::new()));
    }

    if url.starts_with("redis://") {
        #[cfg(feature = "redis")]
        {
            let config = featuresync_online::RedisConfig::new(url);
            let store = featuresync_online::RedisFeatureStore::new(config)
                .await
                .with_context(|| format!("Failed to connect to {}", url))?;
            return Ok(Arc::new(store));
        }
        #[cfg(not(feature = "redis"))]
        bail!("Redis feature not enabled. Rebuild CLI with --features redis");
    }

    bail!(
        "Unknown online store URL scheme: {} (supported: sqlite://, redis://, memory://)",
        url
    )
}

/// Serving client for the configured store and feature group
pub async fn open_client(config: &CliConfig) -> Result<FeatureStoreClient> {
    let store = open_store(&config.feature_store.url).await?;
    Ok(FeatureStoreClient::new(store).with_feature_group(config.feature_store.group_name.clone()))
}

pub fn parse_customer_id(raw: &str) -> Result<CustomerId> {
    CustomerId::parse(raw).with_context(|| format!("Invalid customer id '{}'", raw))
}

/// Read an events file with the given column layout
pub async fn load_events_file(path: &str, mapping: ColumnMapping) -> Result<Vec<RawEvent>> {
    ResultMaterializer::new(mapping)
        .load_events(path)
        .await
        .with_context(|| format!("Failed to load events from {}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_memory_store() {
        let store = open_store("memory://").await.unwrap();
        assert_eq!(store.store_type(), "memory");
    }

    #[tokio::test]
    async fn test_open_sqlite_store_creates_parent_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("online.db");
        let url = format!("sqlite://{}", path.display());

        let store = open_store(&url).await.unwrap();
        assert_eq!(store.store_type(), "sqlite");
        assert!(path.exists());
    }

    struct DownStore;

    #[async_trait::async_trait]
    impl FeatureStore for DownStore {
        async fn put_record(
            &self,
            _feature_group: &str,
            _record: &featuresync_core::FeatureRecord,
        ) -> featuresync_core::Result<featuresync_core::PutOutcome> {
            Err(featuresync_core::Error::Unavailable("down".to_string()))
        }

        async fn get_record(
            &self,
            _feature_group: &str,
            _customer_id: &CustomerId,
        ) -> featuresync_core::Result<Option<featuresync_core::FeatureRecord>> {
            Err(featuresync_core::Error::Unavailable("down".to_string()))
        }

        async fn health_check(&self) -> featuresync_core::Result<()> {
            Err(featuresync_core::Error::Unavailable("connection refused".to_string()))
        }

        fn store_type(&self) -> &'static str {
            "down"
        }
    }

    #[tokio::test]
    async fn test_unhealthy_store_is_rejected() {
        let err = ensure_healthy(Arc::new(DownStore), "down://").await.err().unwrap();
        let message = format!("{:#}", err);
        assert!(message.contains("failed its health check"), "{message}");
        assert!(message.contains("connection refused"), "{message}");
    }

    #[tokio::test]
    async fn test_unknown_scheme_is_rejected() {
        let err = open_store("postgres://localhost/db").await.err().unwrap();
        assert!(err.to_string().contains("Unknown online store URL scheme"));
    }

    #[tokio::test]
    async fn test_sqlite_without_path_is_rejected() {
        assert!(open_store("sqlite://").await.is_err());
    }

    #[test]
    fn test_parse_customer_id() {
        assert_eq!(parse_customer_id("86").unwrap(), CustomerId::new(86));
        assert_eq!(parse_customer_id("86.0").unwrap(), CustomerId::new(86));
        assert!(parse_customer_id("abc").is_err());
    }
}
