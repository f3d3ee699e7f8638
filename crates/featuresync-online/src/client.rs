//! Read-side client for low-latency feature serving
//!
//! [`FeatureStoreClient`] fetches a customer's current record and hands the
//! model the values it needs. There is no cache: every call goes to the
//! store, so a read after a completed write sees that write.
//!
//! Two read paths with different rules for missing data:
//!
//! - [`FeatureStoreClient::features_for_scoring`] refuses to fabricate
//!   inputs and fails with [`Error::InsufficientFeatures`]
//! - [`FeatureStoreClient::get_decoded`] is for display and fills absent
//!   features with their schema default

use featuresync_core::codec::{decode, parse_value, DecodedFeatures};
use featuresync_core::retry::retry_async_if;
use featuresync_core::{
    CustomerId, Error, FeatureKind, FeatureRecord, FeatureSchema, FeatureStore, Result,
    RetryPolicy, Scorer, DEFAULT_FEATURE_GROUP,
};
use std::sync::Arc;

/// Serving client for one feature group
#[derive(Clone)]
pub struct FeatureStoreClient {
    store: Arc<dyn FeatureStore>,
    feature_group: String,
    schema: FeatureSchema,
    retry: RetryPolicy,
}

impl FeatureStoreClient {
    /// Client for the default feature group, without retries
    pub fn new(store: Arc<dyn FeatureStore>) -> Self {
        Self {
            store,
            feature_group: DEFAULT_FEATURE_GROUP.to_string(),
            schema: FeatureSchema::customer_transactions(),
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_feature_group(mut self, feature_group: impl Into<String>) -> Self {
        self.feature_group = feature_group.into();
        self
    }

    pub fn with_schema(mut self, schema: FeatureSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Retry transient store failures with `retry`
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn feature_group(&self) -> &str {
        &self.feature_group
    }

    /// Current record for a customer, `None` if it was never written
    pub async fn get_latest(&self, customer_id: &CustomerId) -> Result<Option<FeatureRecord>> {
        let group = self.feature_group.as_str();
        let result = retry_async_if(&self.retry, Error::is_transient, || {
            self.store.get_record(group, customer_id)
        })
        .await;

        match result {
            Ok(record) => {
                tracing::debug!(
                    customer_id = %customer_id,
                    found = record.is_some(),
                    "Fetched latest record"
                );
                Ok(record)
            }
            Err(retry_err) => match retry_err.error {
                corrupt @ Error::CorruptRecord { .. } => Err(corrupt),
                other => Err(Error::Retrieval {
                    customer_id: customer_id.to_string(),
                    message: other.to_string(),
                }),
            },
        }
    }

    /// Typed features with schema defaults for anything absent
    pub async fn get_decoded(&self, customer_id: &CustomerId) -> Result<Option<DecodedFeatures>> {
        match self.get_latest(customer_id).await? {
            Some(record) => decode(&record, &self.schema).map(Some),
            None => Ok(None),
        }
    }

    /// Model inputs in `required` order
    ///
    /// A missing record or a missing required feature is
    /// [`Error::InsufficientFeatures`]; an unparsable value is
    /// [`Error::CorruptRecord`].
    pub async fn features_for_scoring(
        &self,
        customer_id: &CustomerId,
        required: &[String],
    ) -> Result<Vec<f64>> {
        let record = self
            .get_latest(customer_id)
            .await?
            .ok_or_else(|| Error::InsufficientFeatures {
                customer_id: customer_id.to_string(),
                missing: required.to_vec(),
            })?;

        let missing: Vec<String> = required
            .iter()
            .filter(|name| record.get_feature(name).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(Error::InsufficientFeatures {
                customer_id: customer_id.to_string(),
                missing,
            });
        }

        required
            .iter()
            .map(|name| {
                let raw = record.get_feature(name).unwrap_or_default();
                let kind = self.schema.kind_of(name).unwrap_or(FeatureKind::Float);
                parse_value(raw, kind)
                    .map(|v| v.as_f64())
                    .ok_or_else(|| Error::CorruptRecord {
                        customer_id: customer_id.to_string(),
                        feature: name.clone(),
                        value: raw.to_string(),
                    })
            })
            .collect()
    }

    /// Score a customer with `scorer`
    pub async fn score(&self, customer_id: &CustomerId, scorer: &dyn Scorer) -> Result<f64> {
        let required = scorer.required_features();
        let inputs = self.features_for_scoring(customer_id, &required).await?;
        let prediction = scorer.predict(inputs)?;

        tracing::info!(customer_id = %customer_id, prediction, "Scored customer");
        Ok(prediction)
    }
}
