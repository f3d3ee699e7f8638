//! Batch-load an events file into the online store
//!
//! Only the newest event per customer is written, and a stored record that
//! is already newer is kept. Keys that could not be written are listed but do
//! not stop the rest of the batch.

use anyhow::Result;
use comfy_table::Cell;
use featuresync_offline::ColumnMapping;
use featuresync_online::FeatureStoreSync;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{load_events_file, open_store};
use crate::config::CliConfig;
use crate::output::{
    create_table, format_duration, format_problem_count, print_error, print_info, print_output,
    print_success, print_warning, rate_per_sec, OutputFormat,
};

#[derive(Debug, Serialize)]
struct SyncSummary {
    file: String,
    store_type: String,
    feature_group: String,
    events: usize,
    keys: usize,
    written: usize,
    unchanged: usize,
    stale_dropped: usize,
    failed_writes: BTreeMap<String, String>,
    duration_ms: u64,
    keys_per_sec: f64,
}

pub async fn run(
    config: &CliConfig,
    file: &str,
    transactions: bool,
    dry_run: bool,
    output_format: &str,
) -> Result<()> {
    let mapping = if transactions {
        ColumnMapping::transactions()
    } else {
        ColumnMapping::offline_table()
    };
    let events = load_events_file(file, mapping).await?;

    if dry_run {
        let keys = featuresync_online::latest_per_key(events.iter().cloned()).len();
        print_info("Dry run - would sync:");
        print_info(&format!("  Source: {}", file));
        print_info(&format!("  Target: {}", config.feature_store.url));
        print_info(&format!("  Feature group: {}", config.feature_store.group_name));
        print_info(&format!("  Events: {} ({} customers)", events.len(), keys));
        return Ok(());
    }

    let store = open_store(&config.feature_store.url).await?;
    let store_type = store.store_type();
    let sync = FeatureStoreSync::new(store, config.sync_config());

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(format!("Syncing {} events to {}...", events.len(), store_type));
    pb.enable_steady_tick(Duration::from_millis(120));

    let result = sync.sync_batch(events).await;
    pb.finish_and_clear();
    let report = result?;

    let summary = SyncSummary {
        file: file.to_string(),
        store_type: store_type.to_string(),
        feature_group: config.feature_store.group_name.clone(),
        events: report.events,
        keys: report.keys,
        written: report.written,
        unchanged: report.unchanged,
        stale_dropped: report.stale_dropped,
        failed_writes: report
            .failed_writes
            .iter()
            .map(|(id, reason)| (id.to_string(), reason.clone()))
            .collect(),
        duration_ms: report.duration.as_millis() as u64,
        keys_per_sec: rate_per_sec(report.keys, report.duration),
    };

    match OutputFormat::parse(output_format) {
        OutputFormat::Table => {
            let mut table = create_table();
            table.set_header(vec![
                "Events",
                "Customers",
                "Written",
                "Unchanged",
                "Kept newer",
                "Failed",
            ]);
            table.add_row(vec![
                Cell::new(summary.events),
                Cell::new(summary.keys),
                Cell::new(summary.written),
                Cell::new(summary.unchanged),
                Cell::new(summary.stale_dropped),
                format_problem_count(summary.failed_writes.len()),
            ]);
            println!("{table}");

            for (customer_id, reason) in &summary.failed_writes {
                print_error(&format!("Customer {}: {}", customer_id, reason));
            }

            if report.is_complete() {
                print_success(&format!(
                    "Synced {} customers to {} in {} ({:.0} keys/sec)",
                    summary.keys,
                    store_type,
                    format_duration(report.duration),
                    summary.keys_per_sec
                ));
            } else {
                print_warning(&format!(
                    "{} of {} customers could not be written; rerun to retry them",
                    summary.failed_writes.len(),
                    summary.keys
                ));
            }
        }
        _ => {
            print_output(&summary, output_format)?;
        }
    }

    Ok(())
}
