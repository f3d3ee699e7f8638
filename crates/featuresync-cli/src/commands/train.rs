//! Train the reference model from historical features
//!
//! Submits the historical query, polls it to completion, loads the result
//! into events, fits the model and saves it to the artifact store.

use anyhow::{Context, Result};
use featuresync_core::JobPoller;
use featuresync_offline::{
    train_linear, ArtifactStore, DuckDbQueryService, LocalArtifactStore, ResultMaterializer,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::CliConfig;
use crate::output::{
    create_table, format_duration, print_info, print_output, print_success, OutputFormat,
};

#[derive(Debug, Serialize)]
struct TrainReport {
    job_id: String,
    result_location: String,
    rows: usize,
    train_rows: usize,
    test_rows: usize,
    slope: f64,
    intercept: f64,
    test_mse: Option<f64>,
    model_path: String,
    duration_ms: u64,
}

pub async fn run(config: &CliConfig, cancel: &CancellationToken, output_format: &str) -> Result<()> {
    let started = Instant::now();
    let query = config.historical_query()?;
    let request = query.to_request().context("Failed to render historical query")?;

    let service = DuckDbQueryService::new(config.query_service_config());
    let poller = JobPoller::new(Arc::new(service), config.poll_config());

    print_info(&format!(
        "Querying {}.{} from {} to {}",
        query.database, query.table, query.window.start, query.window.end
    ));

    let job_id = poller
        .submit(&request)
        .await
        .context("Historical query was rejected")?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]")?);
    pb.set_message(format!("Waiting for job {}...", job_id));
    pb.enable_steady_tick(Duration::from_millis(120));

    let outcome = poller.await_completion_until_cancelled(&job_id, cancel).await;
    pb.finish_and_clear();
    let location = outcome.with_context(|| format!("Historical query job {} did not succeed", job_id))?;

    tracing::info!(job_id = %job_id, location = %location, "Historical query finished");

    let events = ResultMaterializer::default().load_events(&location).await?;
    let model = train_linear(&events, &config.train_config()).context("Training failed")?;

    let artifacts = LocalArtifactStore::new(&config.model.artifact_root)?;
    artifacts.put(&config.model.path, model.to_json()?).await?;

    let report = TrainReport {
        job_id: job_id.to_string(),
        result_location: location,
        rows: events.len(),
        train_rows: model.train_rows,
        test_rows: model.test_rows,
        slope: model.slope,
        intercept: model.intercept,
        test_mse: model.test_mse,
        model_path: artifacts.root().join(&config.model.path).display().to_string(),
        duration_ms: started.elapsed().as_millis() as u64,
    };

    match OutputFormat::parse(output_format) {
        OutputFormat::Table => {
            let mut table = create_table();
            table.set_header(vec!["Property", "Value"]);
            table.add_row(vec!["Job", &report.job_id]);
            table.add_row(vec!["Result", &report.result_location]);
            table.add_row(vec![
                "Rows (train / test)".to_string(),
                format!("{} ({} / {})", report.rows, report.train_rows, report.test_rows),
            ]);
            table.add_row(vec![
                "Model".to_string(),
                format!("{} = {:.6} + {:.6} * {}", model.target, report.intercept, report.slope, model.feature),
            ]);
            table.add_row(vec![
                "Test MSE".to_string(),
                report
                    .test_mse
                    .map(|mse| format!("{:.6}", mse))
                    .unwrap_or_else(|| "-".to_string()),
            ]);
            println!("{table}");
            print_success(&format!(
                "Model saved to {} in {}",
                report.model_path,
                format_duration(started.elapsed())
            ));
        }
        _ => {
            print_output(&report, output_format)?;
        }
    }

    Ok(())
}
