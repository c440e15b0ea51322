use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use aquaflux_cache::{FileBackend, TransactionCache};
use aquaflux_core::VaultTransaction;
use aquaflux_metrics::MetricsHandle;
use aquaflux_sync::Synchronizer;
use clap::Args;
use tokio::sync::RwLock;
use tracing::info;

use crate::{ChainOpts, LogOpts, StoreOpts};

#[derive(Args, Debug)]
pub struct CatchUpOpts {
    #[command(flatten)]
    pub(crate) chain: ChainOpts,

    #[command(flatten)]
    store: StoreOpts,

    #[command(flatten)]
    log_opts: LogOpts,
}

/// Run a single sync cycle against the vault file cache.
///
/// Fails when the cycle stopped before the chain head so scripts can retry.
pub async fn run(opts: CatchUpOpts) -> Result<()> {
    aquaflux_metrics::init_local_tracing(opts.log_opts.format())
        .map_err(|e| anyhow!("failed to initialize tracing: {e}"))?;
    opts.store.ensure_data_dir().await?;

    let sync_metrics = MetricsHandle::register(aquaflux_sync::Metrics::register);
    let reader = opts.chain.reader()?;
    let mut cache = TransactionCache::new(
        "vault",
        FileBackend::<VaultTransaction>::for_scope(&opts.store.data_dir, "vault"),
    )
    .with_stale_after(opts.store.stale_after());
    cache.load().await;
    let cache = Arc::new(RwLock::new(cache));

    let report = Synchronizer::for_vault(reader, cache.clone(), opts.chain.sync_config(), sync_metrics)
        .sync_once()
        .await;
    let total = cache.read().await.len();
    info!(
        windows = report.windows,
        new = report.new_transactions.len(),
        total,
        last_checked_block = report.last_checked_block,
        "catch up finished"
    );
    if !report.complete {
        bail!(
            "sync stopped at block {}, run again to resume",
            report.last_checked_block
        );
    }
    Ok(())
}
