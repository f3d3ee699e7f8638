//! featuresync CLI - train, stream and serve customer features
//!
//! Commands:
//! - `train` - Query historical features, train the model and save it
//! - `predict` - Score a customer from their latest online features
//! - `stream` - Replay a transaction file into the online store in real time
//! - `sync` - Batch-load the newest event per customer into the online store
//! - `show` - Show a customer's current features

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod output;

use commands::{predict, show, stream, sync, train};
use output::print_error;

/// featuresync CLI - feature store sync and serving
#[derive(Parser)]
#[command(name = "featuresync")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Feature store sync and serving CLI", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "FEATURESYNC_CONFIG")]
    config: Option<String>,

    /// Online store URL, overrides the config file (sqlite://path, redis://host:port, memory://)
    #[arg(long, env = "FEATURESYNC_STORE_URL")]
    store_url: Option<String>,

    /// Feature group name, overrides the config file
    #[arg(long, env = "FEATURESYNC_FEATURE_GROUP")]
    feature_group: Option<String>,

    /// Output format (table, json, yaml)
    #[arg(short, long, default_value = "table")]
    output: String,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query historical features, train the model and save it
    Train,

    /// Score a customer from their latest online features
    Predict {
        /// Customer id
        #[arg(long)]
        customer_id: String,
    },

    /// Replay a transaction file into the online store in real time
    Stream {
        /// Transactions CSV (customer_id, purchase_timestamp, purchase_value, loyalty_score)
        #[arg(short, long)]
        file: String,

        /// Delay between events in milliseconds
        #[arg(long, default_value = "0")]
        delay_ms: u64,
    },

    /// Batch-load the newest event per customer into the online store
    Sync {
        /// Events CSV (offline table columns unless --transactions)
        #[arg(short, long)]
        file: String,

        /// The file uses the raw transaction columns
        #[arg(long)]
        transactions: bool,

        /// Dry run - show what would be synced without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Show a customer's current features
    Show {
        /// Customer id
        #[arg(long)]
        customer_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup tracing based on verbosity
    let filter = match cli.verbose {
        0 => "warn,featuresync=info",
        1 => "info,featuresync=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    // Load configuration, flags win over the file
    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(url) = cli.store_url {
        config.feature_store.url = url;
    }
    if let Some(group) = cli.feature_group {
        config.feature_store.group_name = group;
    }

    // Ctrl-C stops polling and streaming
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            print_error("Interrupted, shutting down");
            ctrl_c.cancel();
        }
    });

    // Execute command
    match cli.command {
        Commands::Train => {
            train::run(&config, &cancel, &cli.output).await?;
        }

        Commands::Predict { customer_id } => {
            predict::run(&config, &customer_id, &cli.output).await?;
        }

        Commands::Stream { file, delay_ms } => {
            stream::run(&config, &file, delay_ms, &cancel, &cli.output).await?;
        }

        Commands::Sync {
            file,
            transactions,
            dry_run,
        } => {
            sync::run(&config, &file, transactions, dry_run, &cli.output).await?;
        }

        Commands::Show { customer_id } => {
            show::run(&config, &customer_id, &cli.output).await?;
        }
    }

    Ok(())
}
