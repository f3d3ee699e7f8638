//! FeatureRecord codec
//!
//! Converts between typed [`RawEvent`]s and string-encoded [`FeatureRecord`]s.
//!
//! ## Format
//!
//! - Key: canonical decimal integer string
//! - Event time: `YYYY-MM-DDTHH:MM:SSZ` (UTC, second precision)
//! - Floats: shortest representation that parses back to the same `f64`,
//!   always with a decimal point (`5` is written `5.0`). No exponent, no
//!   locale-dependent separators.
//! - Ints: plain decimal
//!
//! `decode(encode(e))` recovers every value of `e` exactly.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::BTreeMap;

use crate::types::{
    truncate_to_seconds, CustomerId, FeatureKind, FeatureRecord, FeatureSchema, FeatureValue,
    RawEvent, CUSTOMER_ID, EVENT_TIME,
};
use crate::{Error, Result};

const EVENT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Formats an event time as ISO-8601 UTC with a `Z` suffix
pub fn format_event_time(ts: DateTime<Utc>) -> String {
    ts.format(EVENT_TIME_FORMAT).to_string()
}

/// Parses a stored event time
///
/// Accepts any RFC 3339 timestamp and converts it to UTC, truncated to
/// whole seconds.
pub fn parse_event_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|ts| truncate_to_seconds(ts.with_timezone(&Utc)))
        .map_err(|e| Error::invalid_input(format!("invalid event time '{}': {}", raw, e)))
}

/// Parses a timestamp from an ingestion source
///
/// Sources are less strict than the store: besides RFC 3339 this accepts
/// naive `YYYY-MM-DD HH:MM:SS[.fff]` and `YYYY-MM-DDTHH:MM:SS[.fff]`, which are
/// interpreted as UTC.
pub fn parse_source_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(ts) = parse_event_time(trimmed) {
        return Ok(ts);
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(truncate_to_seconds(naive.and_utc()));
        }
    }

    Err(Error::invalid_input(format!(
        "unrecognized timestamp '{}'",
        raw
    )))
}

/// Formats a feature value in the fixed decimal format
pub fn format_value(value: &FeatureValue) -> Result<String> {
    match value {
        FeatureValue::Int(v) => Ok(v.to_string()),
        FeatureValue::Float(v) => {
            if !v.is_finite() {
                return Err(Error::invalid_input(format!(
                    "non-finite feature value {}",
                    v
                )));
            }
            // f64 Display is the shortest round-trip form and never uses exponents
            let mut s = v.to_string();
            if !s.contains('.') {
                s.push_str(".0");
            }
            Ok(s)
        }
    }
}

/// Parses a stored string back to its declared type
pub fn parse_value(raw: &str, kind: FeatureKind) -> Option<FeatureValue> {
    let trimmed = raw.trim();
    match kind {
        FeatureKind::Int => trimmed.parse::<i64>().ok().map(FeatureValue::Int),
        FeatureKind::Float => trimmed
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(FeatureValue::Float),
    }
}

/// Encodes a raw event into its stored form
///
/// Feature names may not shadow the `customer_id` or `event_time` fields of
/// the stored record.
pub fn encode(event: &RawEvent) -> Result<FeatureRecord> {
    let mut features = BTreeMap::new();
    for (name, value) in &event.features {
        if name == CUSTOMER_ID || name == EVENT_TIME {
            return Err(Error::invalid_input(format!(
                "customer '{}': feature name '{}' is reserved",
                event.customer_id, name
            )));
        }
        let encoded = format_value(value).map_err(|e| {
            Error::invalid_input(format!(
                "customer '{}', feature '{}': {}",
                event.customer_id, name, e
            ))
        })?;
        features.insert(name.clone(), encoded);
    }

    Ok(FeatureRecord {
        customer_id: event.customer_id.clone(),
        event_time: truncate_to_seconds(event.event_time),
        features,
    })
}

/// Typed view of a stored record
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFeatures {
    pub customer_id: CustomerId,
    pub event_time: DateTime<Utc>,
    pub values: BTreeMap<String, FeatureValue>,
    /// Schema features that were absent and filled with their default
    pub defaulted: Vec<String>,
}

impl DecodedFeatures {
    pub fn get(&self, name: &str) -> Option<FeatureValue> {
        self.values.get(name).copied()
    }

    /// Value widened to f64, `0.0` when unknown to the schema
    pub fn get_f64(&self, name: &str) -> f64 {
        self.get(name).map(|v| v.as_f64()).unwrap_or(0.0)
    }
}

/// Decodes a stored record against a schema
///
/// Features the schema declares but the record lacks decode to their default
/// (`0.0` for floats, `0` for ints) and are listed in `defaulted`; partial
/// records are normal while a customer's history warms up. Features the
/// schema does not declare are ignored. An unparsable value is a
/// [`Error::CorruptRecord`].
pub fn decode(record: &FeatureRecord, schema: &FeatureSchema) -> Result<DecodedFeatures> {
    let mut values = BTreeMap::new();
    let mut defaulted = Vec::new();

    for spec in &schema.features {
        match record.features.get(&spec.name) {
            Some(raw) => {
                let value = parse_value(raw, spec.kind).ok_or_else(|| Error::CorruptRecord {
                    customer_id: record.customer_id.to_string(),
                    feature: spec.name.clone(),
                    value: raw.clone(),
                })?;
                values.insert(spec.name.clone(), value);
            }
            None => {
                values.insert(spec.name.clone(), FeatureValue::default_for(spec.kind));
                defaulted.push(spec.name.clone());
            }
        }
    }

    Ok(DecodedFeatures {
        customer_id: record.customer_id.clone(),
        event_time: record.event_time,
        values,
        defaulted,
    })
}
