//! # TxFlow Node
//!
//! Runs an eventpool fed from standard input, one entry per line, with an
//! optional local block loop. Also inspects write-ahead logs and checks
//! configuration files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use txflow_config::Config;
use txflow_eventpool::Eventpool;
use txflow_node::{
    init_tracing, inspect_wal, start_eventpool, AppKind, BlockProducer, LogFormat,
};
use txflow_state::{GenesisDoc, RocksDb, StateStore};
use txflow_types::{Entry, EntryInfo};

/// TxFlow eventpool node and tools
#[derive(Parser, Debug)]
#[command(name = "txflow-node")]
#[command(version)]
#[command(about = "TxFlow eventpool node")]
struct Cli {
    /// Enable verbose logging (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log format (overrides the config file)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the eventpool, reading entries from stdin
    Start {
        /// Application validating entries
        #[arg(long, value_enum, default_value = "kvstore")]
        app: AppKind,

        /// WAL directory (overrides config)
        #[arg(long)]
        wal_dir: Option<PathBuf>,

        /// State directory; enables the local block loop
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Genesis file used when the state directory is empty
        #[arg(long, requires = "state_dir")]
        genesis: Option<PathBuf>,

        /// Block interval in milliseconds
        #[arg(long, default_value = "1000")]
        block_interval_ms: u64,

        /// Maximum entries per block
        #[arg(long)]
        max_block_entries: Option<usize>,
    },

    /// Summarize a write-ahead log file
    InspectWal {
        /// Log file path
        path: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Validate a configuration file and print it with defaults filled in
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let format = match cli.log_format {
        Some(format) => format,
        None => LogFormat::from_config(&config.logging.format)?,
    };
    init_tracing(&config.logging.level, format, cli.verbose)?;

    match cli.command {
        Commands::Start {
            app,
            wal_dir,
            state_dir,
            genesis,
            block_interval_ms,
            max_block_entries,
        } => {
            let mut config = config;
            if wal_dir.is_some() {
                config.eventpool.wal_dir = wal_dir;
            }
            handle_start(
                config,
                app,
                state_dir,
                genesis,
                Duration::from_millis(block_interval_ms.max(1)),
                max_block_entries,
            )
            .await
        }
        Commands::InspectWal { path, json } => handle_inspect_wal(&path, json),
        Commands::CheckConfig => handle_check_config(&cli.config, &config),
    }
}

/// Handle the `start` command
async fn handle_start(
    config: Config,
    app_kind: AppKind,
    state_dir: Option<PathBuf>,
    genesis: Option<PathBuf>,
    block_interval: Duration,
    max_block_entries: Option<usize>,
) -> Result<()> {
    let app = app_kind.build();
    let (pool, replay) = start_eventpool(config.eventpool.clone(), app.clone()).await?;
    info!(
        app = ?app_kind,
        pending = pool.size(),
        replayed = replay.admitted,
        wal = ?pool.wal_path(),
        "Eventpool started"
    );

    let mut producer = match state_dir {
        Some(dir) => {
            let store = StateStore::new(Arc::new(RocksDb::open(&dir)?));
            let state = match genesis {
                Some(path) => store.load_state_or_genesis_file(&path)?,
                None => store.load_state_or_genesis_doc(&local_genesis())?,
            };
            info!(
                chain_id = %state.chain_id,
                height = state.last_block_height,
                "Loaded state"
            );
            let producer = BlockProducer::new(pool.clone(), app, store, state);
            Some(match max_block_entries {
                Some(max) => producer.with_max_entries(max),
                None => producer,
            })
        }
        None => None,
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut ticker = tokio::time::interval(block_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            line = lines.next_line(), if stdin_open => match line.context("failed to read stdin")? {
                Some(line) => submit_line(&pool, line).await,
                None => {
                    debug!("stdin closed");
                    stdin_open = false;
                    if producer.is_none() {
                        break;
                    }
                }
            },
            _ = ticker.tick(), if producer.is_some() => {
                if let Some(producer) = producer.as_mut() {
                    producer.produce_block().await?;
                }
            }
        }
    }

    pool.flush_app_conn().await.ok();
    let metrics = pool.metrics();
    pool.shutdown().await?;
    info!(metrics = %serde_json::to_string(&metrics)?, "Node stopped");
    Ok(())
}

/// Submit one stdin line as an entry; the verdict is logged when it arrives
async fn submit_line(pool: &Eventpool, line: String) {
    let line = line.trim_end_matches('\r');
    if line.is_empty() {
        return;
    }
    let entry = Entry::from(line.as_bytes());
    let fingerprint = entry.fingerprint();
    match pool.check_entry(entry, EntryInfo::local()).await {
        Ok(handle) => {
            tokio::spawn(async move {
                match handle.await {
                    Ok(()) => debug!(fingerprint = %fingerprint.short(), "entry admitted"),
                    Err(e) => warn!(fingerprint = %fingerprint.short(), error = %e, "entry rejected"),
                }
            });
        }
        Err(e) => warn!(fingerprint = %fingerprint.short(), error = %e, "entry not accepted"),
    }
}

fn local_genesis() -> GenesisDoc {
    GenesisDoc {
        chain_id: "txflow-local".to_string(),
        consensus_params: None,
        validators: Vec::new(),
        app_hash: Vec::new(),
    }
}

/// Handle the `inspect-wal` command
fn handle_inspect_wal(path: &Path, json: bool) -> Result<()> {
    let summary = inspect_wal(path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("WAL: {}", path.display());
        println!("  Records:       {}", summary.records);
        println!("  Payload bytes: {}", summary.payload_bytes);
        println!("  File size:     {}", summary.file_size);
    }
    Ok(())
}

/// Handle the `check-config` command
fn handle_check_config(path: &Option<PathBuf>, config: &Config) -> Result<()> {
    if path.is_none() {
        bail!("--config is required for check-config");
    }
    config.validate()?;
    print!("{}", config.to_toml());
    Ok(())
}
