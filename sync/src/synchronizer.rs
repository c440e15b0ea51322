use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use aquaflux_cache::{CacheBackend, CacheEntry, TransactionCache};
use aquaflux_chain::{
    fetch_decimals, read_range, BlockRange, ChainReader, Normalized, Normalizer, QueryScope,
    RawTransfer, TokenContracts,
};
use aquaflux_core::{Address, Token, VaultTransaction, WalletTransaction};
use aquaflux_metrics::Recorder;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    metrics::{CheckpointEvent, CycleEvent, WindowEvent},
    Metrics,
};

/// Default cap on the number of blocks read by one window.
pub const DEFAULT_MAX_BLOCK_SPAN: u64 = 2_000;
/// Default number of blocks scanned on a cold start.
pub const DEFAULT_BACKFILL_BLOCKS: u64 = 10_000;

/// A cache record the synchronizer can produce from raw transfers.
pub trait SyncEntry: CacheEntry {
    /// Name of the scope in logs and metric labels
    const KIND: &'static str;

    /// Turn the transfers of one window into records.
    fn normalize(
        normalizer: &Normalizer<'_>,
        transfers: &[RawTransfer],
        timestamps: &BTreeMap<u64, i64>,
    ) -> Normalized<Self>;
}

impl SyncEntry for VaultTransaction {
    const KIND: &'static str = "vault";

    fn normalize(
        normalizer: &Normalizer<'_>,
        transfers: &[RawTransfer],
        timestamps: &BTreeMap<u64, i64>,
    ) -> Normalized<Self> {
        normalizer.vault_transactions(transfers, timestamps)
    }
}

impl SyncEntry for WalletTransaction {
    const KIND: &'static str = "wallet";

    fn normalize(
        normalizer: &Normalizer<'_>,
        transfers: &[RawTransfer],
        timestamps: &BTreeMap<u64, i64>,
    ) -> Normalized<Self> {
        normalizer.wallet_transactions(transfers, timestamps)
    }
}

/// What to synchronize and in which steps.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// The vault whose transfers are tracked
    pub vault: Address,
    /// Token contracts of the two token universe
    pub contracts: TokenContracts,
    /// Largest window read with one set of queries
    pub max_block_span: u64,
    /// Blocks scanned below the latest block on a cold start
    pub backfill_blocks: u64,
}

impl SyncConfig {
    /// Config with the default span and backfill.
    pub fn new(vault: Address, contracts: TokenContracts) -> Self {
        Self {
            vault,
            contracts,
            max_block_span: DEFAULT_MAX_BLOCK_SPAN,
            backfill_blocks: DEFAULT_BACKFILL_BLOCKS,
        }
    }
}

/// Result of one [`Synchronizer::sync_once`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncReport<T> {
    /// Windows read, including an incomplete last one
    pub windows: usize,
    /// Records whose id was not in the cache before this cycle
    pub new_transactions: Vec<T>,
    /// Checkpoint after the cycle
    pub last_checked_block: u64,
    /// True when the cycle reached the latest block
    pub complete: bool,
}

impl<T> SyncReport<T> {
    fn unchanged(last_checked_block: u64) -> Self {
        Self {
            windows: 0,
            new_transactions: Vec::new(),
            last_checked_block,
            complete: false,
        }
    }
}

/// Brings one cache up to date with the chain.
///
/// The cache is locked only while a window is merged, reads go to the chain without holding
/// it. Run at most one synchronizer per cache.
pub struct Synchronizer<R, T, B> {
    reader: R,
    cache: Arc<RwLock<TransactionCache<T, B>>>,
    scope: QueryScope,
    config: SyncConfig,
    metrics: Metrics,
}

impl<R, T, B> std::fmt::Debug for Synchronizer<R, T, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("scope", &self.scope)
            .field("config", &self.config)
            .finish()
    }
}

impl<R, B> Synchronizer<R, VaultTransaction, B>
where
    R: ChainReader,
    B: CacheBackend<VaultTransaction>,
{
    /// Synchronizer of every transfer into and out of the vault.
    pub fn for_vault(
        reader: R,
        cache: Arc<RwLock<TransactionCache<VaultTransaction, B>>>,
        config: SyncConfig,
        metrics: Metrics,
    ) -> Self {
        Self::new(reader, cache, QueryScope::Vault, config, metrics)
    }
}

impl<R, B> Synchronizer<R, WalletTransaction, B>
where
    R: ChainReader,
    B: CacheBackend<WalletTransaction>,
{
    /// Synchronizer of the transfers between `wallet` and the vault.
    pub fn for_wallet(
        reader: R,
        cache: Arc<RwLock<TransactionCache<WalletTransaction, B>>>,
        wallet: Address,
        config: SyncConfig,
        metrics: Metrics,
    ) -> Self {
        Self::new(reader, cache, QueryScope::Wallet(wallet), config, metrics)
    }
}

impl<R, T, B> Synchronizer<R, T, B>
where
    R: ChainReader,
    T: SyncEntry,
    B: CacheBackend<T>,
{
    fn new(
        reader: R,
        cache: Arc<RwLock<TransactionCache<T, B>>>,
        scope: QueryScope,
        config: SyncConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            reader,
            cache,
            scope,
            config,
            metrics,
        }
    }

    /// The cache this synchronizer writes to
    pub fn cache(&self) -> &Arc<RwLock<TransactionCache<T, B>>> {
        &self.cache
    }

    fn record_cycle(&self, outcome: &'static str) {
        self.metrics.record(&CycleEvent {
            scope: T::KIND,
            outcome,
        });
    }

    /// Run one sync cycle.
    ///
    /// Reads every block between the checkpoint and the latest block in windows of at most
    /// `max_block_span` blocks. The checkpoint moves past a window only after its records were
    /// merged, and only when every query, timestamp and decimals lookup of the window
    /// succeeded. The first incomplete window ends the cycle so the next one retries it.
    /// Chain failures never surface as errors, the cache keeps what it had.
    pub async fn sync_once(&self) -> SyncReport<T> {
        let latest = match self.reader.latest_block().await {
            Ok(latest) => latest,
            Err(err) => {
                warn!(scope = T::KIND, %err, "failed to read latest block, keeping cached transactions");
                self.record_cycle("failed");
                let checkpoint = self.cache.read().await.get_last_checked_block();
                return SyncReport::unchanged(checkpoint);
            }
        };

        let start = {
            let cache = self.cache.read().await;
            let checkpoint = cache.get_last_checked_block();
            if checkpoint == 0 && (!cache.is_initialized() || cache.should_refetch()) {
                let start = latest.saturating_sub(self.config.backfill_blocks);
                info!(scope = T::KIND, start, latest, "cold start backfill");
                start
            } else {
                checkpoint + 1
            }
        };

        let Ok(range) = BlockRange::new(start, latest) else {
            debug!(scope = T::KIND, latest, "already up to date");
            let mut cache = self.cache.write().await;
            cache.set_last_checked_block(latest);
            cache.set_initialized();
            cache.persist().await;
            self.record_cycle("up_to_date");
            return SyncReport {
                windows: 0,
                new_transactions: Vec::new(),
                last_checked_block: cache.get_last_checked_block(),
                complete: true,
            };
        };

        let decimals = fetch_decimals(&self.reader, &Token::ALL).await;
        let normalizer = Normalizer::new(&self.config.vault, &decimals);
        let queries = self.scope.queries(&self.config.vault, &self.config.contracts);

        let mut windows = 0;
        let mut complete = true;
        let mut new_transactions = Vec::new();
        for window in range.chunks(self.config.max_block_span) {
            windows += 1;
            let read = read_range(&self.reader, &queries, window).await;
            let normalized = T::normalize(&normalizer, &read.transfers, &read.timestamps);
            let window_complete = read.is_complete() && normalized.unresolved() == 0;

            let mut cache = self.cache.write().await;
            let mut seen = HashSet::new();
            let fresh: Vec<T> = normalized
                .records
                .iter()
                .filter(|tx| cache.get(tx.id()).is_none() && seen.insert(tx.id().to_owned()))
                .cloned()
                .collect();
            cache.add_transactions(normalized.records);
            self.metrics.record(&WindowEvent {
                scope: T::KIND,
                failed_queries: read.failed_queries,
                missing_timestamps: read.missing_timestamps,
                added: fresh.len(),
            });
            new_transactions.extend(fresh);

            if !window_complete {
                warn!(
                    scope = T::KIND,
                    %window,
                    failed_queries = read.failed_queries,
                    missing_timestamps = normalized.missing_timestamps,
                    missing_decimals = normalized.missing_decimals,
                    "incomplete window, checkpoint stays at {}",
                    cache.get_last_checked_block()
                );
                complete = false;
                break;
            }
            cache.set_last_checked_block(window.to());
            self.metrics.record(&CheckpointEvent {
                scope: T::KIND,
                block: window.to(),
            });
        }

        let mut cache = self.cache.write().await;
        if complete {
            cache.set_initialized();
        }
        cache.persist().await;
        let last_checked_block = cache.get_last_checked_block();
        drop(cache);

        self.record_cycle(if complete { "complete" } else { "partial" });
        info!(
            scope = T::KIND,
            windows,
            new = new_transactions.len(),
            last_checked_block,
            complete,
            "sync cycle finished"
        );
        SyncReport {
            windows,
            new_transactions,
            last_checked_block,
            complete,
        }
    }
}
