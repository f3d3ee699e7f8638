//! Keyed feature store trait for low-latency feature serving
//!
//! The online store holds exactly one current [`FeatureRecord`] per customer
//! within a feature group. There is no history, no range scan and no
//! multi-key transaction.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐  put_record (if newer)  ┌──────────────────┐
//! │ FeatureStoreSync │ ──────────────────────► │   FeatureStore   │
//! └──────────────────┘                         │ memory/sqlite/   │
//!                                              │ redis            │
//! ┌──────────────────┐  get_record             │ one record / key │
//! │FeatureStoreClient│ ◄────────────────────── └──────────────────┘
//! └──────────────────┘
//! ```
//!
//! ## Conditional writes
//!
//! Concurrent writers to the same key are resolved by event time, not by
//! arrival: `put_record` replaces the current record only when the incoming
//! `event_time` is strictly greater. Implementations must make the
//! compare-and-replace atomic.

use crate::{CustomerId, FeatureRecord, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Result of a conditional write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The record is now current for its key
    Written,
    /// An identical record was already current (idempotent re-write)
    Unchanged,
    /// The store holds a record at least as new; nothing was written
    Stale { current_event_time: DateTime<Utc> },
}

/// Decides how an incoming record relates to the current one
///
/// Strictly newer replaces. Equal event time with identical content is an
/// idempotent re-write; equal event time with different content keeps the
/// record that got there first.
pub fn resolve_put(current: Option<&FeatureRecord>, incoming: &FeatureRecord) -> PutOutcome {
    match current {
        None => PutOutcome::Written,
        Some(existing) if incoming.event_time > existing.event_time => PutOutcome::Written,
        Some(existing) if existing == incoming => PutOutcome::Unchanged,
        Some(existing) => PutOutcome::Stale {
            current_event_time: existing.event_time,
        },
    }
}

/// Trait for keyed feature stores (in-memory, SQLite, Redis)
///
/// ## Implementation Requirements
///
/// - `put_record` is a conditional, atomic, full-record replacement
///   following [`resolve_put`]
/// - `get_record` returns `Ok(None)` for a key that was never written
/// - No caching: every call reflects the backing store
/// - Thread-safe (Send + Sync)
#[async_trait]
pub trait FeatureStore: Send + Sync {
    /// Write a record if it is newer than the current one for its key
    async fn put_record(&self, feature_group: &str, record: &FeatureRecord) -> Result<PutOutcome>;

    /// Fetch the current record for a key
    async fn get_record(
        &self,
        feature_group: &str,
        customer_id: &CustomerId,
    ) -> Result<Option<FeatureRecord>>;

    /// Check if the store is reachable
    async fn health_check(&self) -> Result<()>;

    /// Name of this store type (for logging)
    fn store_type(&self) -> &'static str;
}

/// Build the storage key for a record
///
/// Format: `{feature_group}:customer_id={id}`
pub fn build_record_key(feature_group: &str, customer_id: &CustomerId) -> String {
    format!("{}:{}={}", feature_group, crate::types::CUSTOMER_ID, customer_id)
}
