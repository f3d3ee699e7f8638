//! Local analytical query service backed by DuckDB
//!
//! Serves the offline copy of a feature group from a CSV file. Each submitted
//! query runs as a background job; callers poll it through the
//! [`QueryService`] trait exactly as they would a remote service.
//!
//! ## Execution
//!
//! ```text
//! submit ──► SUBMITTED ──► RUNNING ──► COPY (query) TO '<output>/<job_id>.csv'
//!                                         │
//!                                         ├─► SUCCEEDED (result location)
//!                                         └─► FAILED (DuckDB error, verbatim)
//! ```
//!
//! The source file is exposed as `{database}.{table}` through a view that
//! reads every column as text and normalizes the types: integral customer
//! ids, `event_time` as `YYYY-MM-DDTHH:MM:SSZ` (source times are UTC), and
//! float feature values.

use async_trait::async_trait;
use featuresync_core::{
    recover_mutex, Error, JobId, JobStatus, QueryRequest, QueryService, Result, CUSTOMER_ID,
    EVENT_TIME, LATEST_LOYALTY_SCORE, LATEST_PURCHASE_VALUE,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Where the offline table lives
#[derive(Debug, Clone)]
pub struct DuckDbQueryConfig {
    /// CSV file holding the offline feature group
    pub source_path: PathBuf,
    /// Schema name the table is registered under
    pub database: String,
    /// Table name queries refer to
    pub table: String,
}

/// Runs historical queries in the background with DuckDB
#[derive(Clone)]
pub struct DuckDbQueryService {
    config: DuckDbQueryConfig,
    jobs: Arc<Mutex<HashMap<JobId, JobStatus>>>,
}

impl DuckDbQueryService {
    pub fn new(config: DuckDbQueryConfig) -> Self {
        Self {
            config,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn set_status(jobs: &Mutex<HashMap<JobId, JobStatus>>, job_id: &JobId, status: JobStatus) {
        match recover_mutex(jobs, "DuckDbQueryService") {
            Ok(mut jobs) => {
                jobs.insert(job_id.clone(), status);
            }
            Err(e) => tracing::error!(job_id = %job_id, error = %e, "Failed to record job status"),
        }
    }
}

/// Quotes a string literal for SQL
fn quote_literal(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}

/// Quotes an identifier for SQL
fn quote_ident(raw: &str) -> String {
    format!("\"{}\"", raw.replace('"', "\"\""))
}

/// SQL registering the source file as `{database}.{table}`
fn register_source_sql(config: &DuckDbQueryConfig) -> String {
    let schema = quote_ident(&config.database);
    let view = format!("{}.{}", schema, quote_ident(&config.table));
    format!(
        r#"
        CREATE SCHEMA IF NOT EXISTS {schema};
        CREATE OR REPLACE VIEW {view} AS
        SELECT
            CAST(CAST(trim({id}) AS DOUBLE) AS BIGINT) AS {id},
            strftime(
                CAST(replace(replace(trim({ts}), 'T', ' '), 'Z', '') AS TIMESTAMP),
                '%Y-%m-%dT%H:%M:%SZ'
            ) AS {ts},
            CAST(NULLIF(trim({pv}), '') AS DOUBLE) AS {pv},
            CAST(NULLIF(trim({ls}), '') AS DOUBLE) AS {ls}
        FROM read_csv({path}, header = true, all_varchar = true);
        "#,
        schema = schema,
        view = view,
        id = quote_ident(CUSTOMER_ID),
        ts = quote_ident(EVENT_TIME),
        pv = quote_ident(LATEST_PURCHASE_VALUE),
        ls = quote_ident(LATEST_LOYALTY_SCORE),
        path = quote_literal(&config.source_path.to_string_lossy()),
    )
}

/// Runs one query to completion and returns the result file path
///
/// The error is the failure reason recorded on the job. Engine errors are
/// passed through as DuckDB reports them.
fn execute_query(
    config: &DuckDbQueryConfig,
    query_text: &str,
    output_path: &Path,
) -> std::result::Result<String, String> {
    if !config.source_path.exists() {
        return Err(format!(
            "source table file '{}' does not exist",
            config.source_path.display()
        ));
    }

    let conn = duckdb::Connection::open_in_memory().map_err(|e| e.to_string())?;

    conn.execute_batch(&register_source_sql(config))
        .map_err(|e| format!("failed to register source table: {}", e))?;

    let copy_sql = format!(
        "COPY ({}) TO {} (HEADER, DELIMITER ',')",
        query_text.trim().trim_end_matches(';'),
        quote_literal(&output_path.to_string_lossy())
    );
    conn.execute_batch(&copy_sql).map_err(|e| e.to_string())?;

    Ok(output_path.to_string_lossy().to_string())
}

#[async_trait]
impl QueryService for DuckDbQueryService {
    async fn submit(&self, request: &QueryRequest) -> Result<JobId> {
        if request.query_text.trim().is_empty() {
            return Err(Error::submission("query text is empty"));
        }

        let output_dir = PathBuf::from(&request.output_location);
        tokio::fs::create_dir_all(&output_dir).await.map_err(|e| {
            Error::submission(format!(
                "cannot create output location '{}': {}",
                output_dir.display(),
                e
            ))
        })?;

        let job_id = JobId::new(uuid::Uuid::new_v4().to_string());
        let output_path = output_dir.join(format!("{}.csv", job_id));
        Self::set_status(&self.jobs, &job_id, JobStatus::submitted());

        let jobs = Arc::clone(&self.jobs);
        let config = self.config.clone();
        let query_text = request.query_text.clone();
        let task_job_id = job_id.clone();

        tokio::spawn(async move {
            Self::set_status(&jobs, &task_job_id, JobStatus::running());

            let result = tokio::task::spawn_blocking(move || {
                execute_query(&config, &query_text, &output_path)
            })
            .await;

            let status = match result {
                Ok(Ok(location)) => JobStatus::succeeded(location),
                Ok(Err(reason)) => JobStatus::failed(reason),
                Err(e) => JobStatus::failed(format!("query task aborted: {}", e)),
            };
            tracing::debug!(job_id = %task_job_id, state = %status.state, "Query finished");
            Self::set_status(&jobs, &task_job_id, status);
        });

        Ok(job_id)
    }

    /// Current status of a job
    ///
    /// A terminal status is handed out once and then forgotten, so finished
    /// jobs do not accumulate.
    async fn get_status(&self, job_id: &JobId) -> Result<JobStatus> {
        let mut jobs = recover_mutex(&self.jobs, "DuckDbQueryService")?;
        let status = match jobs.get(job_id).map(|status| status.state.is_terminal()) {
            Some(true) => jobs.remove(job_id),
            Some(false) => jobs.get(job_id).cloned(),
            None => None,
        };
        status.ok_or_else(|| Error::NotFound(format!("unknown job '{}'", job_id)))
    }

    fn service_type(&self) -> &'static str {
        "duckdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_literal_escapes_quotes() {
        assert_eq!(quote_literal("/tmp/it's.csv"), "'/tmp/it''s.csv'");
    }

    #[test]
    fn test_register_source_sql_names_view() {
        let sql = register_source_sql(&DuckDbQueryConfig {
            source_path: PathBuf::from("/data/offline.csv"),
            database: "featurestore_offline".to_string(),
            table: "CustomerTransactions".to_string(),
        });
        assert!(sql.contains(r#"CREATE OR REPLACE VIEW "featurestore_offline"."CustomerTransactions""#));
        assert!(sql.contains("read_csv('/data/offline.csv', header = true, all_varchar = true)"));
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let service = DuckDbQueryService::new(DuckDbQueryConfig {
            source_path: PathBuf::from("/nonexistent.csv"),
            database: "db".to_string(),
            table: "t".to_string(),
        });
        let err = service.get_status(&JobId::new("nope")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_terminal_status_is_forgotten_after_read() {
        let dir = tempfile::TempDir::new().unwrap();
        let service = DuckDbQueryService::new(DuckDbQueryConfig {
            source_path: dir.path().join("missing.csv"),
            database: "db".to_string(),
            table: "t".to_string(),
        });
        let request = QueryRequest {
            query_text: "SELECT 1".to_string(),
            output_location: dir.path().join("results").to_string_lossy().to_string(),
        };
        let job_id = service.submit(&request).await.unwrap();

        let mut status = service.get_status(&job_id).await.unwrap();
        while !status.state.is_terminal() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            status = service.get_status(&job_id).await.unwrap();
        }
        assert!(status.failure_reason.unwrap().contains("missing.csv"));

        let err = service.get_status(&job_id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(service.jobs.lock().unwrap().is_empty());
    }
}
