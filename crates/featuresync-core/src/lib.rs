//! # featuresync core library
//!
//! Core types and traits shared by the ingestion, serving and training paths
//! of featuresync.
//!
//! ## Key Components
//!
//! - **Types**: [`CustomerId`], [`RawEvent`], [`FeatureRecord`], [`FeatureSchema`]
//! - **Codec**: [`codec::encode`] / [`codec::decode`] between typed events and
//!   string-encoded records
//! - **FeatureStore**: the keyed, last-write-wins store trait
//! - **JobPoller**: submit → poll → fetch for analytical queries
//! - **Retry**: bounded exponential backoff for every external call
//! - **Errors**: strongly-typed error handling
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use featuresync_core::{codec, FeatureSchema, RawEvent};
//!
//! let event = RawEvent::customer_transaction(86, event_time, 42.5, 0.8);
//! let record = codec::encode(&event)?;
//! let typed = codec::decode(&record, &FeatureSchema::customer_transactions())?;
//! ```

pub use error::{Error, Result};
pub use job::{FailureKind, Job, JobId, JobPoller, JobState, JobStatus, PollConfig, QueryService};
pub use online_store::{build_record_key, resolve_put, FeatureStore, PutOutcome};
pub use query::{HistoricalQuery, QueryRequest, QueryWindow};
pub use retry::RetryPolicy;
pub use scoring::Scorer;
pub use types::{
    CustomerId, FeatureEntry, FeatureKind, FeatureRecord, FeatureSchema, FeatureSpec,
    FeatureValue, RawEvent, CUSTOMER_ID, DEFAULT_FEATURE_GROUP, EVENT_TIME,
    LATEST_LOYALTY_SCORE, LATEST_PURCHASE_VALUE,
};

pub mod codec;
mod error;
pub mod job;
pub mod online_store;
pub mod query;
pub mod retry;
mod scoring;
pub mod types;

/// Lock a mutex, turning poisoning into an error instead of a panic
pub fn recover_mutex<'a, T>(
    mutex: &'a std::sync::Mutex<T>,
    owner: &str,
) -> Result<std::sync::MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| Error::internal(format!("{} mutex poisoned", owner)))
}

/// Prelude module - commonly used imports
pub mod prelude {
    pub use crate::codec::{decode, encode, DecodedFeatures};
    pub use crate::error::{Error, Result};
    pub use crate::online_store::{FeatureStore, PutOutcome};
    pub use crate::types::{CustomerId, FeatureRecord, FeatureSchema, FeatureValue, RawEvent};
}
