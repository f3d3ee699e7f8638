//! Historical feature query template
//!
//! The training path pulls the offline copy of the feature group for a fixed
//! time window. The query text is rendered from a template so the window and
//! table name are the only moving parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::format_event_time;
use crate::types::{CUSTOMER_ID, EVENT_TIME, LATEST_LOYALTY_SCORE, LATEST_PURCHASE_VALUE};
use crate::{Error, Result};

/// A request handed to the analytical query service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Fully rendered query text
    pub query_text: String,
    /// Where the service should write the result (directory or bucket URI)
    pub output_location: String,
}

/// Closed time window `[start, end]` over `event_time`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl QueryWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(Error::submission(format!(
                "query window start {} is after end {}",
                format_event_time(start),
                format_event_time(end)
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

impl Default for QueryWindow {
    /// 2022-01-01T00:00:00Z through 2022-08-31T23:59:59Z
    fn default() -> Self {
        Self {
            start: from_unix_seconds(1_640_995_200),
            end: from_unix_seconds(1_661_990_399),
        }
    }
}

fn from_unix_seconds(secs: u64) -> DateTime<Utc> {
    DateTime::<Utc>::from(std::time::UNIX_EPOCH + std::time::Duration::from_secs(secs))
}

/// Query over the offline copy of a feature group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalQuery {
    pub database: String,
    pub table: String,
    pub window: QueryWindow,
    pub output_location: String,
}

impl HistoricalQuery {
    pub fn new(
        database: impl Into<String>,
        table: impl Into<String>,
        window: QueryWindow,
        output_location: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            window,
            output_location: output_location.into(),
        }
    }

    /// Render the query text
    ///
    /// Identifiers are interpolated, so they are validated first; anything
    /// other than ASCII alphanumerics and underscores is a submission error.
    pub fn render(&self) -> Result<String> {
        validate_identifier("database", &self.database)?;
        validate_identifier("table", &self.table)?;
        if self.window.start > self.window.end {
            return Err(Error::submission("query window start is after end"));
        }

        Ok(format!(
            "SELECT {}, {}, {}, {}\nFROM {}.{}\nWHERE {} BETWEEN '{}' AND '{}'",
            CUSTOMER_ID,
            EVENT_TIME,
            LATEST_PURCHASE_VALUE,
            LATEST_LOYALTY_SCORE,
            self.database,
            self.table,
            EVENT_TIME,
            format_event_time(self.window.start),
            format_event_time(self.window.end),
        ))
    }

    pub fn to_request(&self) -> Result<QueryRequest> {
        if self.output_location.trim().is_empty() {
            return Err(Error::submission("output location is empty"));
        }
        Ok(QueryRequest {
            query_text: self.render()?,
            output_location: self.output_location.clone(),
        })
    }
}

fn validate_identifier(what: &str, ident: &str) -> Result<()> {
    let valid = !ident.is_empty()
        && ident
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !ident.starts_with(|c: char| c.is_ascii_digit());

    if valid {
        Ok(())
    } else {
        Err(Error::submission(format!("invalid {} name '{}'", what, ident)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_render_default_window() {
        let query = HistoricalQuery::new(
            "featurestore_offline",
            "CustomerTransactions",
            QueryWindow::default(),
            "/tmp/results",
        );
        let sql = query.render().unwrap();
        assert!(sql.starts_with(
            "SELECT customer_id, event_time, latest_purchase_value, latest_loyalty_score"
        ));
        assert!(sql.contains("FROM featurestore_offline.CustomerTransactions"));
        assert!(sql.contains("BETWEEN '2022-01-01T00:00:00Z' AND '2022-08-31T23:59:59Z'"));
    }

    #[test]
    fn test_render_rejects_injection() {
        let query = HistoricalQuery::new(
            "db",
            "t; DROP TABLE x",
            QueryWindow::default(),
            "/tmp/results",
        );
        assert!(matches!(query.render(), Err(Error::Submission(_))));
    }

    #[test]
    fn test_window_must_be_ordered() {
        let start = Utc.with_ymd_and_hms(2022, 9, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        assert!(QueryWindow::new(start, end).is_err());
    }

    #[test]
    fn test_to_request_requires_output_location() {
        let query = HistoricalQuery::new("db", "t", QueryWindow::default(), "  ");
        assert!(matches!(query.to_request(), Err(Error::Submission(_))));
    }

    #[test]
    fn test_window_contains_is_inclusive() {
        let window = QueryWindow::default();
        assert!(window.contains(window.start));
        assert!(window.contains(window.end));
        assert!(!window.contains(window.end + chrono::Duration::seconds(1)));
    }
}
