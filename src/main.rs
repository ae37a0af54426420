//! testrelay CLI - Deliver test results to a remote collector.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use testrelay::config::{self, Config};
use testrelay::endpoint::StorageConfig;
use testrelay::event::{self, ExecutionEvent, MetadataIndex, junit};
use testrelay::pipeline::DeliveryPipeline;
use testrelay::record::{RunDocument, assemble};
use testrelay::report::print_summary;

/// Environment variable holding launcher-supplied storage parameters as JSON.
const INTERFACE_PARAMS_ENV: &str = "TESTRELAY_INTERFACE_PARAMS";

#[derive(Parser)]
#[command(name = "testrelay")]
#[command(about = "Deliver test results to a remote collector", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "testrelay.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send execution events to the collector
    Send {
        /// JSON files with execution events
        #[arg(short, long)]
        events: Vec<PathBuf>,

        /// JUnit XML reports to read events from
        #[arg(short, long)]
        junit: Vec<PathBuf>,

        /// TOML file with per-method metadata
        #[arg(short, long)]
        metadata: Option<PathBuf>,

        /// Override maximum parallel uploads
        #[arg(short, long)]
        parallel: Option<usize>,

        /// Print the assembled document instead of sending it
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Send {
            events,
            junit,
            metadata,
            parallel,
            dry_run,
        } => {
            send_results(
                &cli.config,
                &events,
                &junit,
                metadata.as_deref(),
                parallel,
                dry_run,
            )
            .await
        }
        Commands::Validate => validate_config(&cli.config),
        Commands::Init => init_config(),
    }
}

/// Loads the configuration file and applies launcher overrides from the
/// environment.
fn load_effective_config(config_path: &Path) -> Result<Config> {
    let mut config = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    if let Ok(params) = std::env::var(INTERFACE_PARAMS_ENV) {
        config::apply_interface_params(&mut config, &params)
            .with_context(|| format!("Invalid {}", INTERFACE_PARAMS_ENV))?;
        info!("Applied storage parameters from {}", INTERFACE_PARAMS_ENV);
    }

    Ok(config)
}

fn read_events(event_files: &[PathBuf], junit_files: &[PathBuf]) -> Result<Vec<ExecutionEvent>> {
    let mut events = Vec::new();

    for path in event_files {
        let loaded = event::load_events(path)
            .with_context(|| format!("Failed to read events from {}", path.display()))?;
        info!("Loaded {} events from {}", loaded.len(), path.display());
        events.extend(loaded);
    }

    for path in junit_files {
        let loaded = junit::load_junit_events(path)
            .with_context(|| format!("Failed to read JUnit report {}", path.display()))?;
        info!("Loaded {} events from {}", loaded.len(), path.display());
        events.extend(loaded);
    }

    Ok(events)
}

async fn send_results(
    config_path: &Path,
    event_files: &[PathBuf],
    junit_files: &[PathBuf],
    metadata_path: Option<&Path>,
    parallel_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if event_files.is_empty() && junit_files.is_empty() {
        bail!("Nothing to send: pass --events and/or --junit");
    }

    let mut config = load_effective_config(config_path)?;

    // Apply overrides
    if let Some(parallel) = parallel_override {
        config.delivery.max_parallel = parallel;
    }

    info!("Loaded configuration from {}", config_path.display());

    let events = read_events(event_files, junit_files)?;
    if events.is_empty() {
        warn!("No execution events found");
    }

    let metadata = match metadata_path {
        Some(path) => MetadataIndex::load(path)
            .with_context(|| format!("Failed to read metadata from {}", path.display()))?,
        None => MetadataIndex::default(),
    };

    if dry_run {
        return print_document(&config, &events, &metadata);
    }

    let interrupt = CancellationToken::new();
    forward_ctrl_c(interrupt.clone());

    let pipeline = DeliveryPipeline::from_config(&config)?
        .with_metadata(metadata)
        .with_interrupt(interrupt);
    let report = pipeline.deliver(&events).await;

    print_summary(&report);
    std::process::exit(report.exit_code());
}

/// Cancels `interrupt` on the first Ctrl-C; a second one exits immediately.
fn forward_ctrl_c(interrupt: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupted, pending uploads will be cancelled at shutdown");
        interrupt.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

fn print_document(
    config: &Config,
    events: &[ExecutionEvent],
    metadata: &MetadataIndex,
) -> Result<()> {
    let records: Vec<_> = events
        .iter()
        .map(|e| assemble(e, metadata.lookup(e), &config.run.test_version))
        .collect();

    let document = RunDocument::from_records(&records, &config.run, config.storage.queue_task_id);
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

fn validate_config(config_path: &Path) -> Result<()> {
    let resolved = load_effective_config(config_path)
        .and_then(|config| Ok((StorageConfig::resolve(&config.storage)?, config)));

    match resolved {
        Ok((storage, config)) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Submit URL: {}", storage.submit_url());
            println!("  End URL: {}", storage.end_url());
            println!("  Queue task: {}", storage.queue_task_id());
            println!("  Max parallel: {}", config.delivery.max_parallel);
            println!("  Collect timeout: {}s", config.delivery.collect_timeout_secs);
            println!("  Shutdown grace: {}s", config.delivery.shutdown_grace_secs);

            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_config() -> Result<()> {
    let config = r#"# testrelay configuration file

[storage]
host = "127.0.0.1"
port = "8080"
path = "api/report"
path_end = "api/report/end"
queue_task_id = 1
user_name = "tester"

[delivery]
max_parallel = 10
collect_timeout_secs = 5
shutdown_grace_secs = 2
request_timeout_secs = 30

[run]
test_version = "0.0"
"#;

    let path = PathBuf::from("testrelay.toml");
    if path.exists() {
        eprintln!("testrelay.toml already exists. Remove it first or edit manually.");
        std::process::exit(1);
    }

    std::fs::write(&path, config)?;
    println!("Created testrelay.toml");
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  testrelay send --events events.json");

    Ok(())
}
