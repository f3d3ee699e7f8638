//! featuresync online store: feature serving and synchronization
//!
//! This crate provides the keyed feature store backends, the synchronizer
//! that is the only write path into them, and the client the model reads
//! through.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Online Feature Serving                       │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                   │
//! │   ┌─────────────┐   sync_batch / ingest   ┌──────────────────┐   │
//! │   │ RawEvents   │ ──────────────────────► │ memory / sqlite /│   │
//! │   │ (bulk or    │   write if newer         │ redis            │   │
//! │   │  streamed)  │                          └──────────────────┘   │
//! │   └─────────────┘                                   │            │
//! │                                                     │ get_latest │
//! │                                                     ▼            │
//! │                                              ┌───────────┐       │
//! │                                              │  Scorer   │       │
//! │                                              └───────────┘       │
//! │                                                                   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use featuresync_online::{FeatureStoreClient, FeatureStoreSync, SqliteFeatureStore, SyncConfig};
//!
//! let store = Arc::new(SqliteFeatureStore::open("features.db")?);
//!
//! let sync = FeatureStoreSync::new(store.clone(), SyncConfig::default());
//! let report = sync.sync_batch(events).await?;
//!
//! let client = FeatureStoreClient::new(store);
//! let prediction = client.score(&CustomerId::new(86), &model).await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `redis` (default): Enable the Redis feature store
//! - `all`: Enable all backends

// Re-export core types
pub use featuresync_core::{
    build_record_key, CustomerId, FeatureRecord, FeatureStore, PutOutcome, RawEvent,
};

pub mod client;
pub use client::FeatureStoreClient;

pub mod memory_store;
pub use memory_store::InMemoryFeatureStore;

pub mod sqlite_store;
pub use sqlite_store::SqliteFeatureStore;

pub mod sync;
pub use sync::{latest_per_key, FeatureStoreSync, IngestOutcome, StreamReport, SyncConfig, SyncReport};

// Redis store (default feature)
#[cfg(feature = "redis")]
pub mod redis_store;
#[cfg(feature = "redis")]
pub use redis_store::{RedisConfig, RedisFeatureStore};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_re_exports() {
        let key = build_record_key("CustomerTransactions", &CustomerId::new(123));
        assert_eq!(key, "CustomerTransactions:customer_id=123");
    }
}
