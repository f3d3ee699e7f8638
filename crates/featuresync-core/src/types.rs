//! Core data types for featuresync
//!
//! These types are exchanged between ingestion, storage and retrieval:
//!
//! - [`CustomerId`]: the record key, a string-normalized integer
//! - [`RawEvent`]: one observation from an ingestion source
//! - [`FeatureRecord`]: the stored, string-encoded form of an event
//! - [`FeatureSchema`]: the fixed set of features and their declared types

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{Error, Result};

/// Record identifier feature name
pub const CUSTOMER_ID: &str = "customer_id";
/// Event time feature name
pub const EVENT_TIME: &str = "event_time";
/// Most recent purchase value
pub const LATEST_PURCHASE_VALUE: &str = "latest_purchase_value";
/// Most recent loyalty score
pub const LATEST_LOYALTY_SCORE: &str = "latest_loyalty_score";

/// Default feature group name
pub const DEFAULT_FEATURE_GROUP: &str = "CustomerTransactions";

/// Customer identifier in canonical string form
///
/// Sources hand out ids as integers, strings, or float-typed columns (`"86.0"`).
/// All of them normalize to the same decimal integer string, so `86`, `"86"`
/// and `"86.0"` address the same record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(String);

impl CustomerId {
    /// Creates an id from an integer
    pub fn new(id: i64) -> Self {
        Self(id.to_string())
    }

    /// Parses and normalizes an id
    ///
    /// Accepts integers with optional surrounding whitespace and integral
    /// floats such as `"86.0"`.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if let Ok(id) = trimmed.parse::<i64>() {
            return Ok(Self::new(id));
        }

        match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
                Ok(Self::new(v as i64))
            }
            _ => Err(Error::invalid_input(format!(
                "customer id '{}' is not an integer",
                raw
            ))),
        }
    }

    /// Canonical string form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for CustomerId {
    fn from(id: i64) -> Self {
        Self::new(id)
    }
}

/// Declared numeric type of a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    Int,
    Float,
}

/// A typed scalar feature value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Int(i64),
    Float(f64),
}

impl FeatureValue {
    /// Default used when a feature is absent from a record
    pub fn default_for(kind: FeatureKind) -> Self {
        match kind {
            FeatureKind::Int => FeatureValue::Int(0),
            FeatureKind::Float => FeatureValue::Float(0.0),
        }
    }

    /// Numeric value widened to f64
    pub fn as_f64(&self) -> f64 {
        match self {
            FeatureValue::Int(v) => *v as f64,
            FeatureValue::Float(v) => *v,
        }
    }

    pub fn kind(&self) -> FeatureKind {
        match self {
            FeatureValue::Int(_) => FeatureKind::Int,
            FeatureValue::Float(_) => FeatureKind::Float,
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for FeatureValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

/// One feature declared by a schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    pub kind: FeatureKind,
}

impl FeatureSpec {
    pub fn new(name: impl Into<String>, kind: FeatureKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// The fixed set of scalar features stored for every record
///
/// `customer_id` and `event_time` are always present and not listed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub features: Vec<FeatureSpec>,
}

impl FeatureSchema {
    pub fn new(features: Vec<FeatureSpec>) -> Self {
        Self { features }
    }

    /// Schema of the `CustomerTransactions` feature group
    pub fn customer_transactions() -> Self {
        Self::new(vec![
            FeatureSpec::new(LATEST_PURCHASE_VALUE, FeatureKind::Float),
            FeatureSpec::new(LATEST_LOYALTY_SCORE, FeatureKind::Float),
        ])
    }

    /// Looks up a feature's declared type
    pub fn kind_of(&self, name: &str) -> Option<FeatureKind> {
        self.features
            .iter()
            .find(|spec| spec.name == name)
            .map(|spec| spec.kind)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|spec| spec.name.as_str())
    }
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::customer_transactions()
    }
}

/// Truncates a timestamp to whole seconds
pub fn truncate_to_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// One observation from an ingestion source
///
/// Sources give no ordering guarantee. `event_time` is truncated to whole
/// seconds on construction, matching the stored precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub customer_id: CustomerId,
    pub event_time: DateTime<Utc>,
    pub features: BTreeMap<String, FeatureValue>,
}

impl RawEvent {
    pub fn new(customer_id: CustomerId, event_time: DateTime<Utc>) -> Self {
        Self {
            customer_id,
            event_time: truncate_to_seconds(event_time),
            features: BTreeMap::new(),
        }
    }

    /// Adds a feature (builder pattern)
    pub fn with_feature(mut self, name: impl Into<String>, value: impl Into<FeatureValue>) -> Self {
        self.features.insert(name.into(), value.into());
        self
    }

    /// Convenience constructor for the `CustomerTransactions` schema
    pub fn customer_transaction(
        customer_id: i64,
        event_time: DateTime<Utc>,
        purchase_value: f64,
        loyalty_score: f64,
    ) -> Self {
        Self::new(CustomerId::new(customer_id), event_time)
            .with_feature(LATEST_PURCHASE_VALUE, purchase_value)
            .with_feature(LATEST_LOYALTY_SCORE, loyalty_score)
    }
}

/// One `{FeatureName, ValueAsString}` pair as exchanged with the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureEntry {
    #[serde(rename = "FeatureName")]
    pub name: String,
    #[serde(rename = "ValueAsString")]
    pub value: String,
}

impl FeatureEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The stored form of a customer's current features
///
/// Feature values are kept as their canonical strings; use
/// [`crate::codec::decode`] to get typed values back. A record only ever
/// replaces the previous record for the same key as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub customer_id: CustomerId,
    pub event_time: DateTime<Utc>,
    pub features: BTreeMap<String, String>,
}

impl FeatureRecord {
    /// Flattens the record into store entries, key and event time first
    pub fn to_wire(&self) -> Vec<FeatureEntry> {
        let mut entries = Vec::with_capacity(self.features.len() + 2);
        entries.push(FeatureEntry::new(CUSTOMER_ID, self.customer_id.as_str()));
        entries.push(FeatureEntry::new(
            EVENT_TIME,
            crate::codec::format_event_time(self.event_time),
        ));
        for (name, value) in &self.features {
            entries.push(FeatureEntry::new(name.clone(), value.clone()));
        }
        entries
    }

    /// Rebuilds a record from store entries
    ///
    /// A record without a parsable `customer_id` or `event_time` is corrupt.
    pub fn from_wire(entries: Vec<FeatureEntry>) -> Result<Self> {
        let mut customer_id = None;
        let mut event_time = None;
        let mut features = BTreeMap::new();

        for entry in entries {
            match entry.name.as_str() {
                CUSTOMER_ID => customer_id = Some(entry.value),
                EVENT_TIME => event_time = Some(entry.value),
                _ => {
                    features.insert(entry.name, entry.value);
                }
            }
        }

        let raw_id = customer_id.ok_or_else(|| Error::CorruptRecord {
            customer_id: String::new(),
            feature: CUSTOMER_ID.to_string(),
            value: String::new(),
        })?;
        let customer_id = CustomerId::parse(&raw_id).map_err(|_| Error::CorruptRecord {
            customer_id: raw_id.clone(),
            feature: CUSTOMER_ID.to_string(),
            value: raw_id.clone(),
        })?;

        let raw_time = event_time.ok_or_else(|| Error::CorruptRecord {
            customer_id: customer_id.to_string(),
            feature: EVENT_TIME.to_string(),
            value: String::new(),
        })?;
        let event_time =
            crate::codec::parse_event_time(&raw_time).map_err(|_| Error::CorruptRecord {
                customer_id: customer_id.to_string(),
                feature: EVENT_TIME.to_string(),
                value: raw_time.clone(),
            })?;

        Ok(Self {
            customer_id,
            event_time,
            features,
        })
    }

    pub fn get_feature(&self, name: &str) -> Option<&str> {
        self.features.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_customer_id_normalization() {
        assert_eq!(CustomerId::parse("86").unwrap(), CustomerId::new(86));
        assert_eq!(CustomerId::parse(" 86 ").unwrap(), CustomerId::new(86));
        assert_eq!(CustomerId::parse("86.0").unwrap(), CustomerId::new(86));
        assert_eq!(CustomerId::parse("-3").unwrap().as_str(), "-3");
    }

    #[test]
    fn test_customer_id_rejects_non_integers() {
        assert!(CustomerId::parse("86.5").is_err());
        assert!(CustomerId::parse("abc").is_err());
        assert!(CustomerId::parse("").is_err());
    }

    #[test]
    fn test_raw_event_truncates_to_seconds() {
        let ts = Utc.with_ymd_and_hms(2022, 3, 1, 10, 0, 0).unwrap()
            + chrono::Duration::milliseconds(750);
        let event = RawEvent::new(CustomerId::new(1), ts);
        assert_eq!(event.event_time, Utc.with_ymd_and_hms(2022, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_schema_lookup() {
        let schema = FeatureSchema::customer_transactions();
        assert_eq!(schema.kind_of(LATEST_PURCHASE_VALUE), Some(FeatureKind::Float));
        assert_eq!(schema.kind_of("unknown"), None);
        assert_eq!(schema.names().count(), 2);
    }

    #[test]
    fn test_wire_round_trip() {
        let record = FeatureRecord {
            customer_id: CustomerId::new(29),
            event_time: Utc.with_ymd_and_hms(2022, 5, 1, 8, 30, 0).unwrap(),
            features: BTreeMap::from([
                (LATEST_PURCHASE_VALUE.to_string(), "12.5".to_string()),
                (LATEST_LOYALTY_SCORE.to_string(), "0.7".to_string()),
            ]),
        };

        let wire = record.to_wire();
        assert_eq!(wire[0], FeatureEntry::new(CUSTOMER_ID, "29"));
        assert_eq!(wire[1], FeatureEntry::new(EVENT_TIME, "2022-05-01T08:30:00Z"));

        let back = FeatureRecord::from_wire(wire).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_from_wire_requires_event_time() {
        let err = FeatureRecord::from_wire(vec![FeatureEntry::new(CUSTOMER_ID, "1")]).unwrap_err();
        assert!(matches!(err, Error::CorruptRecord { ref feature, .. } if feature == EVENT_TIME));
    }

    #[test]
    fn test_feature_entry_serializes_with_store_field_names() {
        let json = serde_json::to_string(&FeatureEntry::new("customer_id", "7")).unwrap();
        assert_eq!(json, r#"{"FeatureName":"customer_id","ValueAsString":"7"}"#);
    }
}
