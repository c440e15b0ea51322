//! AquaFlux runs the vault transaction sync service as a single binary.
#![warn(missing_docs)]

mod catch_up;
mod daemon;
mod metrics;

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use aquaflux_cache::{ScopedCaches, DEFAULT_STALE_AFTER};
use aquaflux_chain::{HttpChainReader, RetryConfig, TokenContracts};
use aquaflux_core::{Address, WalletTransaction};
use aquaflux_sync::{SyncConfig, DEFAULT_BACKFILL_BLOCKS, DEFAULT_MAX_BLOCK_SPAN};
use clap::{Args, Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use shutdown::Shutdown;
use signal_hook_tokio::Signals;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the sync daemon and its HTTP API
    Daemon(daemon::DaemonOpts),
    /// Drain the vault backlog into the cache once and exit
    CatchUp(catch_up::CatchUpOpts),
}

#[derive(Args, Debug)]
struct ChainOpts {
    /// JSON-RPC endpoint of the chain.
    #[arg(long, env = "AQUAFLUX_RPC_URL")]
    rpc_url: String,

    /// Address of the vault whose transfers are tracked.
    #[arg(long, env = "AQUAFLUX_VAULT_ADDRESS")]
    vault_address: Address,

    /// Contract address of the FLUX token.
    #[arg(long, env = "AQUAFLUX_FLUX_ADDRESS")]
    flux_address: Address,

    /// Contract address of the USDC token.
    #[arg(long, env = "AQUAFLUX_USDC_ADDRESS")]
    usdc_address: Address,

    /// Timeout of a single RPC attempt in milliseconds.
    #[arg(long, default_value_t = 15_000, env = "AQUAFLUX_RPC_TIMEOUT_MS")]
    rpc_timeout_ms: u64,

    /// Retries of a failed RPC request before giving up.
    #[arg(long, default_value_t = 3, env = "AQUAFLUX_RPC_MAX_RETRIES")]
    rpc_max_retries: u32,

    /// Delay before the first RPC retry in milliseconds, doubled on every further retry.
    #[arg(long, default_value_t = 500, env = "AQUAFLUX_RPC_RETRY_DELAY_MS")]
    rpc_retry_delay_ms: u64,

    /// Largest block window read with one set of log queries.
    #[arg(long, default_value_t = DEFAULT_MAX_BLOCK_SPAN, env = "AQUAFLUX_MAX_BLOCK_SPAN")]
    max_block_span: u64,

    /// Blocks scanned below the chain head when the cache starts empty.
    #[arg(long, default_value_t = DEFAULT_BACKFILL_BLOCKS, env = "AQUAFLUX_BACKFILL_BLOCKS")]
    backfill_blocks: u64,
}

impl ChainOpts {
    fn contracts(&self) -> TokenContracts {
        TokenContracts {
            flux: self.flux_address.clone(),
            usdc: self.usdc_address.clone(),
        }
    }

    fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            max_block_span: self.max_block_span,
            backfill_blocks: self.backfill_blocks,
            ..SyncConfig::new(self.vault_address.clone(), self.contracts())
        }
    }

    fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.rpc_max_retries,
            base_delay: Duration::from_millis(self.rpc_retry_delay_ms),
            request_timeout: Duration::from_millis(self.rpc_timeout_ms),
            ..Default::default()
        }
    }

    fn reader(&self) -> Result<HttpChainReader> {
        HttpChainReader::try_new(&self.rpc_url, self.contracts(), self.retry_config())
            .context("failed to create chain reader")
    }
}

#[derive(Args, Debug)]
struct StoreOpts {
    /// Directory of the JSON cache files.
    #[arg(short, long, default_value = "./data", env = "AQUAFLUX_DATA_DIR")]
    data_dir: PathBuf,

    /// Seconds after the last fetch before an empty cache backfills again.
    #[arg(long, default_value_t = DEFAULT_STALE_AFTER.as_secs(), env = "AQUAFLUX_STALE_AFTER_SECS")]
    stale_after_secs: u64,
}

impl StoreOpts {
    fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    fn wallet_caches(&self) -> ScopedCaches<WalletTransaction> {
        ScopedCaches::new(self.data_dir.join("wallets")).with_stale_after(self.stale_after())
    }

    /// Create the data directory if it does not exist.
    async fn ensure_data_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", self.data_dir.display()))
    }
}

#[derive(Args, Debug)]
struct LogOpts {
    /// Specify the format of log events.
    #[arg(long, default_value = "multi-line", env = "AQUAFLUX_LOG_FORMAT")]
    log_format: LogFormat,
}

impl LogOpts {
    fn format(&self) -> aquaflux_metrics::config::LogFormat {
        match self.log_format {
            LogFormat::SingleLine => aquaflux_metrics::config::LogFormat::SingleLine,
            LogFormat::MultiLine => aquaflux_metrics::config::LogFormat::MultiLine,
            LogFormat::Json => aquaflux_metrics::config::LogFormat::Json,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Default)]
enum LogFormat {
    /// Format log events on multiple lines using ANSI colors.
    #[default]
    MultiLine,
    /// Format log events on a single line using ANSI colors.
    SingleLine,
    /// Format log events newline delimited JSON objects.
    /// No ANSI colors are used.
    Json,
}

/// Run the command given on the command line.
pub async fn run() -> Result<()> {
    let args = Cli::parse();
    match args.command {
        Command::Daemon(opts) => daemon::run(opts).await,
        Command::CatchUp(opts) => catch_up::run(opts).await,
    }
}

async fn handle_signals(mut signals: Signals, shutdown: Shutdown) {
    let mut pending = true;
    while let Some(signal) = signals.next().await {
        debug!(?signal, "signal received");
        if pending {
            pending = false;
            info!("sending shutdown message");
            shutdown.shutdown();
        }
    }
}
