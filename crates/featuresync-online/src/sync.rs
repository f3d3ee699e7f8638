//! Event → feature store synchronization
//!
//! [`FeatureStoreSync`] is the only write path into a [`FeatureStore`]. It
//! runs in two modes:
//!
//! 1. **Batch** ([`FeatureStoreSync::sync_batch`]): a bulk result set is
//!    folded to one event per customer ([`latest_per_key`]) and the
//!    survivors are written concurrently.
//! 2. **Streaming** ([`FeatureStoreSync::ingest`], [`FeatureStoreSync::run_stream`]):
//!    events are written one at a time as they arrive, in any order.
//!
//! Both modes go through the store's conditional write, so an event older
//! than the stored record never replaces it, regardless of which process
//! wrote the newer one.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use featuresync_online::{FeatureStoreSync, SqliteFeatureStore, SyncConfig};
//!
//! let store = Arc::new(SqliteFeatureStore::open("features.db")?);
//! let sync = FeatureStoreSync::new(store, SyncConfig::default());
//!
//! let report = sync.sync_batch(events).await?;
//! println!("{} written, {} failed", report.written, report.failed_writes.len());
//! ```

use chrono::{DateTime, Utc};
use featuresync_core::codec::{encode, format_event_time};
use featuresync_core::retry::{retry_async_if, RetryError};
use featuresync_core::{
    CustomerId, Error, FeatureRecord, FeatureStore, PutOutcome, RawEvent, Result, RetryPolicy,
    DEFAULT_FEATURE_GROUP,
};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Synchronizer configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Feature group every record is written to
    pub feature_group: String,
    /// Retry policy for transient write failures
    pub retry: RetryPolicy,
    /// Upper bound on in-flight writes during a batch
    pub max_concurrent_writes: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            feature_group: DEFAULT_FEATURE_GROUP.to_string(),
            retry: RetryPolicy::default(),
            max_concurrent_writes: 16,
        }
    }
}

/// Batch sync result
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Events received
    pub events: usize,
    /// Distinct keys after the per-key fold
    pub keys: usize,
    pub written: usize,
    /// Keys whose current record was already identical
    pub unchanged: usize,
    /// Keys where the store already held a newer record
    pub stale_dropped: usize,
    /// Keys that could not be written, with the last error seen
    pub failed_writes: BTreeMap<CustomerId, String>,
    pub duration: Duration,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failed_writes.is_empty()
    }
}

/// What happened to one streamed event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Written,
    /// Identical to the current record
    Unchanged,
    /// Older than the current record; logged and dropped
    StaleDropped { current_event_time: DateTime<Utc> },
}

/// Streaming run totals
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamReport {
    pub received: usize,
    pub written: usize,
    pub unchanged: usize,
    pub stale_dropped: usize,
    pub failed: usize,
    /// Whether the run stopped because of cancellation
    pub cancelled: bool,
}

/// Folds events to the newest one per customer
///
/// An event replaces the kept one only when its `event_time` is strictly
/// greater, so on ties the earlier event in the input wins. The output is in
/// first-seen key order.
pub fn latest_per_key<I>(events: I) -> Vec<RawEvent>
where
    I: IntoIterator<Item = RawEvent>,
{
    let mut slots: HashMap<CustomerId, usize> = HashMap::new();
    let mut latest: Vec<RawEvent> = Vec::new();

    for event in events {
        match slots.get(&event.customer_id) {
            Some(&idx) => {
                if event.event_time > latest[idx].event_time {
                    latest[idx] = event;
                }
            }
            None => {
                slots.insert(event.customer_id.clone(), latest.len());
                latest.push(event);
            }
        }
    }

    latest
}

/// Writes events into a feature store, newest-wins per customer
#[derive(Clone)]
pub struct FeatureStoreSync {
    store: Arc<dyn FeatureStore>,
    config: SyncConfig,
}

impl FeatureStoreSync {
    pub fn new(store: Arc<dyn FeatureStore>, config: SyncConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Sync a bulk result set
    ///
    /// Per-key failures never abort the batch: a key whose write still fails
    /// after retries is reported in [`SyncReport::failed_writes`] and the
    /// remaining keys are written.
    pub async fn sync_batch(&self, events: Vec<RawEvent>) -> Result<SyncReport> {
        let start = Instant::now();
        let event_count = events.len();
        let latest = latest_per_key(events);

        tracing::info!(
            feature_group = %self.config.feature_group,
            store = self.store.store_type(),
            events = event_count,
            keys = latest.len(),
            "Starting batch sync"
        );

        let mut report = SyncReport {
            events: event_count,
            keys: latest.len(),
            ..Default::default()
        };

        let concurrency = self.config.max_concurrent_writes.max(1);
        let results: Vec<(CustomerId, Result<PutOutcome>)> = stream::iter(latest)
            .map(|event| async move {
                let customer_id = event.customer_id.clone();
                let outcome = match encode(&event) {
                    Ok(record) => self.write_with_retry(&record).await,
                    Err(e) => Err(e),
                };
                (customer_id, outcome)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for (customer_id, outcome) in results {
            match outcome {
                Ok(PutOutcome::Written) => report.written += 1,
                Ok(PutOutcome::Unchanged) => report.unchanged += 1,
                Ok(PutOutcome::Stale { current_event_time }) => {
                    tracing::info!(
                        customer_id = %customer_id,
                        current_event_time = %format_event_time(current_event_time),
                        "Store already holds a newer record, skipping"
                    );
                    report.stale_dropped += 1;
                }
                Err(e) => {
                    tracing::warn!(customer_id = %customer_id, error = %e, "Write failed");
                    report.failed_writes.insert(customer_id, e.to_string());
                }
            }
        }

        report.duration = start.elapsed();
        tracing::info!(
            feature_group = %self.config.feature_group,
            written = report.written,
            unchanged = report.unchanged,
            stale_dropped = report.stale_dropped,
            failed = report.failed_writes.len(),
            duration_ms = report.duration.as_millis() as u64,
            "Batch sync complete"
        );

        Ok(report)
    }

    /// Write one event if it is newer than the stored record
    ///
    /// Errors are returned after the retry policy is exhausted; the caller
    /// decides whether to keep going.
    pub async fn ingest(&self, event: &RawEvent) -> Result<IngestOutcome> {
        let record = encode(event)?;

        match self.write_with_retry(&record).await? {
            PutOutcome::Written => {
                tracing::debug!(
                    customer_id = %event.customer_id,
                    event_time = %format_event_time(event.event_time),
                    "Record written"
                );
                Ok(IngestOutcome::Written)
            }
            PutOutcome::Unchanged => Ok(IngestOutcome::Unchanged),
            PutOutcome::Stale { current_event_time } => {
                tracing::warn!(
                    customer_id = %event.customer_id,
                    event_time = %format_event_time(event.event_time),
                    current_event_time = %format_event_time(current_event_time),
                    "Dropping stale event"
                );
                Ok(IngestOutcome::StaleDropped { current_event_time })
            }
        }
    }

    /// Ingest events from a channel until it closes or `cancel` fires
    ///
    /// A failed write is logged and counted; the stream keeps going.
    pub async fn run_stream(
        &self,
        mut events: mpsc::Receiver<RawEvent>,
        cancel: CancellationToken,
    ) -> Result<StreamReport> {
        let mut report = StreamReport::default();

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(received = report.received, "Stream cancelled");
                    report.cancelled = true;
                    break;
                }
                next = events.recv() => match next {
                    Some(event) => event,
                    None => break,
                },
            };

            report.received += 1;
            match self.ingest(&event).await {
                Ok(IngestOutcome::Written) => report.written += 1,
                Ok(IngestOutcome::Unchanged) => report.unchanged += 1,
                Ok(IngestOutcome::StaleDropped { .. }) => report.stale_dropped += 1,
                Err(e) => {
                    tracing::error!(customer_id = %event.customer_id, error = %e, "Failed to ingest event");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            received = report.received,
            written = report.written,
            stale_dropped = report.stale_dropped,
            failed = report.failed,
            "Stream finished"
        );
        Ok(report)
    }

    async fn write_with_retry(&self, record: &FeatureRecord) -> Result<PutOutcome> {
        let group = self.config.feature_group.as_str();
        retry_async_if(&self.config.retry, Error::is_transient, || {
            self.store.put_record(group, record)
        })
        .await
        .map_err(|RetryError { error, attempts, .. }| {
            if attempts > 1 {
                tracing::debug!(customer_id = %record.customer_id, attempts, "Giving up on write");
            }
            error
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 1, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_sync_config_default() {
        let config = SyncConfig::default();
        assert_eq!(config.feature_group, "CustomerTransactions");
        assert_eq!(config.max_concurrent_writes, 16);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_latest_per_key_keeps_newest() {
        let events = vec![
            RawEvent::customer_transaction(1, at(10, 0), 5.0, 0.2),
            RawEvent::customer_transaction(1, at(9, 0), 3.0, 0.1),
            RawEvent::customer_transaction(2, at(10, 5), 7.0, 0.3),
        ];
        let latest = latest_per_key(events);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].customer_id, CustomerId::new(1));
        assert_eq!(latest[0].event_time, at(10, 0));
        assert_eq!(latest[1].customer_id, CustomerId::new(2));
    }

    #[test]
    fn test_latest_per_key_tie_keeps_first_seen() {
        let events = vec![
            RawEvent::customer_transaction(1, at(10, 0), 5.0, 0.2),
            RawEvent::customer_transaction(1, at(10, 0), 6.0, 0.9),
        ];
        let latest = latest_per_key(events);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].features["latest_purchase_value"].as_f64(), 5.0);
    }

    #[test]
    fn test_latest_per_key_preserves_first_seen_order() {
        let events = vec![
            RawEvent::customer_transaction(3, at(8, 0), 1.0, 0.1),
            RawEvent::customer_transaction(1, at(8, 0), 1.0, 0.1),
            RawEvent::customer_transaction(3, at(9, 0), 2.0, 0.1),
            RawEvent::customer_transaction(2, at(8, 0), 1.0, 0.1),
        ];
        let ids: Vec<String> = latest_per_key(events)
            .into_iter()
            .map(|e| e.customer_id.to_string())
            .collect();
        assert_eq!(ids, vec!["3", "1", "2"]);
    }

    #[test]
    fn test_latest_per_key_empty() {
        assert!(latest_per_key(Vec::new()).is_empty());
    }
}
