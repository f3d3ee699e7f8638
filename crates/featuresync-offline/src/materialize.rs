//! Loading result sets and transaction files into events
//!
//! Both the bulk query result and the raw transaction feed are delimited
//! files with a header. A [`ColumnMapping`] says which column carries which
//! field; the rows become [`RawEvent`]s sorted by event time.
//!
//! Empty feature cells are left out of the event rather than filled in, so a
//! partial row produces a partial record.

use featuresync_core::codec::parse_source_timestamp;
use featuresync_core::{
    CustomerId, Error, RawEvent, Result, CUSTOMER_ID, EVENT_TIME, LATEST_LOYALTY_SCORE,
    LATEST_PURCHASE_VALUE,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Source column names for each event field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub customer_id: String,
    pub event_time: String,
    pub purchase_value: String,
    pub loyalty_score: String,
}

impl ColumnMapping {
    /// Columns of the offline table and of query results
    pub fn offline_table() -> Self {
        Self {
            customer_id: CUSTOMER_ID.to_string(),
            event_time: EVENT_TIME.to_string(),
            purchase_value: LATEST_PURCHASE_VALUE.to_string(),
            loyalty_score: LATEST_LOYALTY_SCORE.to_string(),
        }
    }

    /// Columns of the raw transaction feed
    pub fn transactions() -> Self {
        Self {
            customer_id: CUSTOMER_ID.to_string(),
            event_time: "purchase_timestamp".to_string(),
            purchase_value: "purchase_value".to_string(),
            loyalty_score: "loyalty_score".to_string(),
        }
    }
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self::offline_table()
    }
}

/// Reads delimited result files into events
#[derive(Debug, Clone, Default)]
pub struct ResultMaterializer {
    mapping: ColumnMapping,
}

type RawRow = (Option<String>, Option<String>, Option<String>, Option<String>);

impl ResultMaterializer {
    pub fn new(mapping: ColumnMapping) -> Self {
        Self { mapping }
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    /// Load all rows of `path`, sorted by event time
    pub async fn load_events(&self, path: impl AsRef<Path>) -> Result<Vec<RawEvent>> {
        let path = path.as_ref().to_path_buf();
        let mapping = self.mapping.clone();
        tokio::task::spawn_blocking(move || load_events_blocking(&path, &mapping))
            .await
            .map_err(|e| Error::internal(format!("materialization task failed: {}", e)))?
    }
}

fn quote_ident(raw: &str) -> String {
    format!("\"{}\"", raw.replace('"', "\"\""))
}

fn read_rows(path: &Path, mapping: &ColumnMapping) -> Result<Vec<RawRow>> {
    let conn = duckdb::Connection::open_in_memory()
        .map_err(|e| Error::StorageError(anyhow::anyhow!("DuckDB error: {}", e)))?;

    let sql = format!(
        "SELECT {}, {}, {}, {} FROM read_csv('{}', header = true, all_varchar = true)",
        quote_ident(&mapping.customer_id),
        quote_ident(&mapping.event_time),
        quote_ident(&mapping.purchase_value),
        quote_ident(&mapping.loyalty_score),
        path.to_string_lossy().replace('\'', "''"),
    );

    let mut stmt = conn.prepare(&sql).map_err(|e| {
        Error::invalid_input(format!("cannot read '{}': {}", path.display(), e))
    })?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })
        .map_err(|e| Error::StorageError(anyhow::anyhow!("Query error: {}", e)))?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::StorageError(anyhow::anyhow!("Row error: {}", e)))
}

fn parse_feature(raw: Option<&str>, column: &str, row: usize) -> Result<Option<f64>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(value) => match value.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            Ok(_) => Err(Error::invalid_input(format!(
                "row {}: column '{}' has non-finite value '{}'",
                row, column, value
            ))),
            Err(_) => Err(Error::invalid_input(format!(
                "row {}: column '{}' has non-numeric value '{}'",
                row, column, value
            ))),
        },
    }
}

fn load_events_blocking(path: &Path, mapping: &ColumnMapping) -> Result<Vec<RawEvent>> {
    if !path.exists() {
        return Err(Error::NotFound(format!("result file '{}' does not exist", path.display())));
    }

    let rows = read_rows(path, mapping)?;
    let mut events = Vec::with_capacity(rows.len());

    for (idx, (id, ts, pv, ls)) in rows.into_iter().enumerate() {
        // Header is line 1
        let line = idx + 2;

        let raw_id = id.unwrap_or_default();
        let customer_id = CustomerId::parse(&raw_id)
            .map_err(|e| Error::invalid_input(format!("row {}: {}", line, e)))?;
        let raw_ts = ts.unwrap_or_default();
        let event_time = parse_source_timestamp(&raw_ts)
            .map_err(|e| Error::invalid_input(format!("row {}: {}", line, e)))?;

        let mut event = RawEvent::new(customer_id, event_time);
        if let Some(v) = parse_feature(pv.as_deref(), &mapping.purchase_value, line)? {
            event = event.with_feature(LATEST_PURCHASE_VALUE, v);
        }
        if let Some(v) = parse_feature(ls.as_deref(), &mapping.loyalty_score, line)? {
            event = event.with_feature(LATEST_LOYALTY_SCORE, v);
        }
        events.push(event);
    }

    // Stable: equal times keep file order
    events.sort_by_key(|e| e.event_time);

    tracing::info!(path = %path.display(), events = events.len(), "Loaded events");
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_load_transactions_sorted_by_time() {
        let file = csv(
            "customer_id,purchase_timestamp,purchase_value,loyalty_score\n\
             2,2022-01-01 10:05:00,7.0,0.3\n\
             1,2022-01-01T10:00:00Z,5.0,0.2\n\
             1.0,2022-01-01 09:00:00.750,3.0,0.1\n",
        );

        let events = ResultMaterializer::new(ColumnMapping::transactions())
            .load_events(file.path())
            .await
            .unwrap();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].customer_id, CustomerId::new(1));
        assert_eq!(events[0].event_time, Utc.with_ymd_and_hms(2022, 1, 1, 9, 0, 0).unwrap());
        assert_eq!(events[2].customer_id, CustomerId::new(2));
        assert_eq!(events[2].features[LATEST_PURCHASE_VALUE].as_f64(), 7.0);
    }

    #[tokio::test]
    async fn test_empty_cells_are_absent_features() {
        let file = csv(
            "customer_id,event_time,latest_purchase_value,latest_loyalty_score\n\
             5,2022-02-01T00:00:00Z,12.5,\n",
        );

        let events = ResultMaterializer::default().load_events(file.path()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].features.contains_key(LATEST_PURCHASE_VALUE));
        assert!(!events[0].features.contains_key(LATEST_LOYALTY_SCORE));
    }

    #[tokio::test]
    async fn test_bad_value_names_row() {
        let file = csv(
            "customer_id,event_time,latest_purchase_value,latest_loyalty_score\n\
             5,2022-02-01T00:00:00Z,abc,0.1\n",
        );

        let err = ResultMaterializer::default().load_events(file.path()).await.unwrap_err();
        assert!(err.to_string().contains("row 2"));
    }

    #[tokio::test]
    async fn test_non_finite_value_names_row() {
        for cell in ["nan", "inf", "-Infinity"] {
            let file = csv(&format!(
                "customer_id,event_time,latest_purchase_value,latest_loyalty_score\n\
                 5,2022-02-01T00:00:00Z,1.0,0.1\n\
                 6,2022-02-01T00:00:00Z,{},0.1\n",
                cell
            ));

            let err = ResultMaterializer::default().load_events(file.path()).await.unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{cell}: {err}");
            assert!(err.to_string().contains("row 3"), "{cell}: {err}");
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let err = ResultMaterializer::default()
            .load_events("/nonexistent/result.csv")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
