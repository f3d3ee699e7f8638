//! In-memory feature store
//!
//! Holds one record per key in a `HashMap` behind a mutex. The compare and
//! replace in `put_record` happens under the lock, so concurrent writers to
//! the same key resolve by event time exactly as the durable backends do.
//!
//! Used for tests, the `memory://` URL, and short-lived simulations.

use async_trait::async_trait;
use featuresync_core::{
    build_record_key, recover_mutex, resolve_put, CustomerId, FeatureRecord, FeatureStore,
    PutOutcome, Result,
};
use std::collections::HashMap;
use std::sync::Mutex;

/// Process-local feature store
#[derive(Debug, Default)]
pub struct InMemoryFeatureStore {
    records: Mutex<HashMap<String, FeatureRecord>>,
}

impl InMemoryFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held, across all feature groups
    pub fn len(&self) -> Result<usize> {
        Ok(recover_mutex(&self.records, "InMemoryFeatureStore")?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl FeatureStore for InMemoryFeatureStore {
    async fn put_record(&self, feature_group: &str, record: &FeatureRecord) -> Result<PutOutcome> {
        let key = build_record_key(feature_group, &record.customer_id);
        let mut records = recover_mutex(&self.records, "InMemoryFeatureStore")?;

        let outcome = resolve_put(records.get(&key), record);
        if outcome == PutOutcome::Written {
            records.insert(key, record.clone());
        }
        Ok(outcome)
    }

    async fn get_record(
        &self,
        feature_group: &str,
        customer_id: &CustomerId,
    ) -> Result<Option<FeatureRecord>> {
        let key = build_record_key(feature_group, customer_id);
        let records = recover_mutex(&self.records, "InMemoryFeatureStore")?;
        Ok(records.get(&key).cloned())
    }

    async fn health_check(&self) -> Result<()> {
        recover_mutex(&self.records, "InMemoryFeatureStore").map(|_| ())
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use featuresync_core::codec::encode;
    use featuresync_core::RawEvent;

    fn record(id: i64, hour: u32, pv: f64) -> FeatureRecord {
        let ts = Utc.with_ymd_and_hms(2022, 1, 1, hour, 0, 0).unwrap();
        encode(&RawEvent::customer_transaction(id, ts, pv, 0.5)).unwrap()
    }

    #[tokio::test]
    async fn test_get_unknown_key_is_none() {
        let store = InMemoryFeatureStore::new();
        let found = store
            .get_record("CustomerTransactions", &CustomerId::new(1))
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_put_only_replaces_with_newer() {
        let store = InMemoryFeatureStore::new();
        let group = "CustomerTransactions";

        assert_eq!(store.put_record(group, &record(1, 10, 5.0)).await.unwrap(), PutOutcome::Written);
        assert!(matches!(
            store.put_record(group, &record(1, 9, 3.0)).await.unwrap(),
            PutOutcome::Stale { .. }
        ));
        assert_eq!(store.put_record(group, &record(1, 10, 5.0)).await.unwrap(), PutOutcome::Unchanged);

        let current = store.get_record(group, &CustomerId::new(1)).await.unwrap().unwrap();
        assert_eq!(current.get_feature("latest_purchase_value"), Some("5.0"));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_feature_groups_are_separate() {
        let store = InMemoryFeatureStore::new();
        store.put_record("a", &record(1, 10, 5.0)).await.unwrap();

        assert!(store.get_record("b", &CustomerId::new(1)).await.unwrap().is_none());
        assert!(store.get_record("a", &CustomerId::new(1)).await.unwrap().is_some());
    }
}
