//! Replay a transaction file as a real-time stream
//!
//! Events are sent in file order (sorted by purchase time) with an optional
//! delay between them. Each one is written only if it is newer than what the
//! store holds; late arrivals are logged and dropped.

use anyhow::{Context, Result};
use comfy_table::Cell;
use featuresync_offline::ColumnMapping;
use featuresync_online::FeatureStoreSync;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{load_events_file, open_store};
use crate::config::CliConfig;
use crate::output::{
    create_table, format_duration, format_problem_count, print_info, print_output, print_success,
    print_warning, rate_per_sec, OutputFormat,
};

#[derive(Debug, Serialize)]
struct StreamSummary {
    file: String,
    store_type: String,
    feature_group: String,
    received: usize,
    written: usize,
    unchanged: usize,
    stale_dropped: usize,
    failed: usize,
    cancelled: bool,
    duration_ms: u64,
    events_per_sec: f64,
}

pub async fn run(
    config: &CliConfig,
    file: &str,
    delay_ms: u64,
    cancel: &CancellationToken,
    output_format: &str,
) -> Result<()> {
    let events = load_events_file(file, ColumnMapping::transactions()).await?;
    let store = open_store(&config.feature_store.url).await?;
    let store_type = store.store_type();
    let sync = FeatureStoreSync::new(store, config.sync_config());

    print_info(&format!(
        "Streaming {} events from {} into {} ({})",
        events.len(),
        file,
        config.feature_store.group_name,
        store_type
    ));

    let pb = ProgressBar::new(events.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} events ({eta})")?
            .progress_chars("#>-"),
    );

    let (tx, rx) = mpsc::channel(64);
    let delay = Duration::from_millis(delay_ms);
    let producer_cancel = cancel.clone();
    let producer_pb = pb.clone();

    let producer = tokio::spawn(async move {
        for event in events {
            if tx.send(event).await.is_err() {
                break;
            }
            producer_pb.inc(1);

            if !delay.is_zero() {
                tokio::select! {
                    _ = producer_cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        // Dropping the sender closes the stream
    });

    let started = Instant::now();
    let report = sync.run_stream(rx, cancel.clone()).await?;
    producer.await.context("Event producer task failed")?;
    let elapsed = started.elapsed();

    if report.cancelled {
        pb.abandon_with_message("Interrupted");
    } else {
        pb.finish_and_clear();
    }

    let summary = StreamSummary {
        file: file.to_string(),
        store_type: store_type.to_string(),
        feature_group: config.feature_store.group_name.clone(),
        received: report.received,
        written: report.written,
        unchanged: report.unchanged,
        stale_dropped: report.stale_dropped,
        failed: report.failed,
        cancelled: report.cancelled,
        duration_ms: elapsed.as_millis() as u64,
        events_per_sec: rate_per_sec(report.received, elapsed),
    };

    match OutputFormat::parse(output_format) {
        OutputFormat::Table => {
            let mut table = create_table();
            table.set_header(vec!["Received", "Written", "Unchanged", "Stale dropped", "Failed"]);
            table.add_row(vec![
                Cell::new(summary.received),
                Cell::new(summary.written),
                Cell::new(summary.unchanged),
                Cell::new(summary.stale_dropped),
                format_problem_count(summary.failed),
            ]);
            println!("{table}");

            if summary.cancelled {
                print_warning(&format!(
                    "Stream interrupted after {} events",
                    summary.received
                ));
            } else {
                print_success(&format!(
                    "Streamed {} events in {} ({:.0} events/sec)",
                    summary.received,
                    format_duration(elapsed),
                    summary.events_per_sec
                ));
            }
        }
        _ => {
            print_output(&summary, output_format)?;
        }
    }

    Ok(())
}
