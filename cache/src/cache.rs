use std::{collections::HashMap, time::Duration};

use aquaflux_core::{now_millis, Checkpoint};
use tracing::{debug, info, warn};

use crate::{backend::sort_newest_first, CacheBackend, CacheEntry, CacheSnapshot, Result};

/// How long a fetch result stays fresh before a cache asks for a new backfill.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Merged and deduplicated view of every known transaction of one scope.
///
/// The cache has no internal locking. Share it between tasks behind an
/// `Arc<tokio::sync::RwLock<_>>` and keep a single writer per scope.
#[derive(Debug)]
pub struct TransactionCache<T, B> {
    scope: String,
    backend: B,
    entries: HashMap<String, T>,
    checkpoint: Checkpoint,
    initialized: bool,
    wallet_address: Option<String>,
    stale_after: Duration,
}

impl<T, B> TransactionCache<T, B>
where
    T: CacheEntry,
    B: CacheBackend<T>,
{
    /// Create an empty cache. `scope` names the cache in logs.
    pub fn new(scope: impl Into<String>, backend: B) -> Self {
        Self {
            scope: scope.into(),
            backend,
            entries: HashMap::new(),
            checkpoint: Checkpoint::default(),
            initialized: false,
            wallet_address: None,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Record the wallet this cache belongs to, it is persisted with the snapshot.
    pub fn with_wallet_address(mut self, wallet: impl Into<String>) -> Self {
        self.wallet_address = Some(wallet.into().to_ascii_lowercase());
        self
    }

    /// Override how long a fetch stays fresh, see [`Self::should_refetch`].
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Name of the scope
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Wallet of a per wallet cache
    pub fn wallet_address(&self) -> Option<&str> {
        self.wallet_address.as_deref()
    }

    /// Upsert the records by id. Returns how many ids were not known before.
    pub fn add_transactions(&mut self, transactions: impl IntoIterator<Item = T>) -> usize {
        let mut added = 0;
        for tx in transactions {
            if self.entries.insert(tx.id().to_owned(), tx).is_none() {
                added += 1;
            }
        }
        if added > 0 {
            debug!(scope = %self.scope, added, total = self.entries.len(), "added transactions");
        }
        added
    }

    /// Every transaction, newest first.
    pub fn get_all(&self) -> Vec<T> {
        let mut all: Vec<T> = self.entries.values().cloned().collect();
        sort_newest_first(&mut all);
        all
    }

    /// Transactions involving `address` (case-insensitive), newest first.
    pub fn get_for_wallet(&self, address: &str) -> Vec<T> {
        let mut matching: Vec<T> = self
            .entries
            .values()
            .filter(|tx| tx.involves(address))
            .cloned()
            .collect();
        sort_newest_first(&mut matching);
        matching
    }

    /// Transaction by id
    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries.get(id)
    }

    /// True when any log of the chain transaction is known.
    pub fn contains_hash(&self, hash: &str) -> bool {
        self.entries
            .values()
            .any(|tx| tx.hash().eq_ignore_ascii_case(hash))
    }

    /// Number of transactions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no transaction is known
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest block already scanned
    pub fn get_last_checked_block(&self) -> u64 {
        self.checkpoint.last_checked_block
    }

    /// Time of the last fetch in milliseconds, zero when never fetched
    pub fn last_fetch_time(&self) -> i64 {
        self.checkpoint.last_fetch_time
    }

    /// Current checkpoint
    pub fn checkpoint(&self) -> Checkpoint {
        self.checkpoint
    }

    /// Record that every block up to `block` was scanned and stamp the fetch time.
    /// The height never moves backwards. Returns true when it advanced.
    pub fn set_last_checked_block(&mut self, block: u64) -> bool {
        self.checkpoint.advance(block, now_millis())
    }

    /// True when the last fetch is older than the staleness threshold.
    pub fn should_refetch(&self) -> bool {
        self.checkpoint.is_stale(now_millis(), self.stale_after)
    }

    /// Whether the cold start backfill already ran.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Mark the cold start backfill as done.
    pub fn set_initialized(&mut self) {
        self.initialized = true;
    }

    /// The persisted form of the cache.
    pub fn snapshot(&self) -> CacheSnapshot<T> {
        CacheSnapshot {
            wallet_address: self.wallet_address.clone(),
            last_checked_block: self.checkpoint.last_checked_block,
            last_fetch_time: self.checkpoint.last_fetch_time,
            initialized: self.initialized,
            transactions: self.get_all(),
        }
    }

    /// Merge the stored snapshot into memory. In memory records win over stored ones.
    ///
    /// A backend failure is logged and leaves the cache as it was. Returns true when a stored
    /// snapshot was found.
    pub async fn load(&mut self) -> bool {
        match self.backend.load().await {
            Ok(Some(stored)) => {
                let merged = self.snapshot().merge(stored);
                self.restore(merged);
                info!(
                    scope = %self.scope,
                    transactions = self.entries.len(),
                    last_checked_block = self.checkpoint.last_checked_block,
                    "loaded transaction cache"
                );
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(scope = %self.scope, %err, "failed to load transaction cache");
                false
            }
        }
    }

    fn restore(&mut self, snapshot: CacheSnapshot<T>) {
        self.entries = snapshot
            .transactions
            .into_iter()
            .map(|tx| (tx.id().to_owned(), tx))
            .collect();
        self.checkpoint = Checkpoint {
            last_checked_block: snapshot.last_checked_block,
            last_fetch_time: snapshot.last_fetch_time,
        };
        self.initialized = snapshot.initialized;
        if snapshot.wallet_address.is_some() {
            self.wallet_address = snapshot.wallet_address;
        }
    }

    /// Write the cache through its backend.
    pub async fn try_persist(&self) -> Result<()> {
        self.backend.save(&self.snapshot()).await
    }

    /// Write the cache through its backend. A failure is logged and the in memory state stays
    /// authoritative. Returns true on success.
    pub async fn persist(&self) -> bool {
        match self.try_persist().await {
            Ok(()) => true,
            Err(err) => {
                warn!(scope = %self.scope, %err, "failed to persist transaction cache");
                false
            }
        }
    }

    /// Forget every transaction and the checkpoint, in memory and in the backend.
    pub async fn reset(&mut self) {
        self.entries.clear();
        self.checkpoint = Checkpoint::default();
        self.initialized = false;
        if let Err(err) = self.backend.clear().await {
            warn!(scope = %self.scope, %err, "failed to clear transaction cache backend");
        }
        info!(scope = %self.scope, "reset transaction cache");
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use aquaflux_core::{Address, Direction, Token, TransactionRecord, VaultTransaction};
    use test_log::test;

    use super::*;
    use crate::{FileBackend, MemoryBackend};

    const VAULT: &str = "0x00000000000000000000000000000000000000fa";

    fn vault_tx(hash: &str, log_index: u64, wallet: &str, timestamp: i64) -> VaultTransaction {
        VaultTransaction::from_vault_record(TransactionRecord {
            id: aquaflux_core::transaction_id(hash, log_index),
            hash: hash.to_owned(),
            from: Address::from_str(wallet).unwrap(),
            to: Address::from_str(VAULT).unwrap(),
            value: "1".to_owned(),
            token: Token::Flux,
            direction: Direction::Incoming,
            timestamp,
            block_number: 1,
        })
    }

    fn cache() -> TransactionCache<VaultTransaction, MemoryBackend<VaultTransaction>> {
        TransactionCache::new("vault", MemoryBackend::new())
    }

    #[test]
    fn adding_twice_is_idempotent() {
        let mut cache = cache();
        let batch = vec![
            vault_tx("0x01", 0, "0x000000000000000000000000000000000000aaaa", 1),
            vault_tx("0x01", 1, "0x000000000000000000000000000000000000aaaa", 1),
        ];
        assert_eq!(cache.add_transactions(batch.clone()), 2);
        let first = cache.get_all();
        assert_eq!(cache.add_transactions(batch), 0);
        assert_eq!(cache.get_all(), first);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn later_write_wins() {
        let mut cache = cache();
        let mut tx = vault_tx("0x01", 0, "0x000000000000000000000000000000000000aaaa", 1);
        cache.add_transactions([tx.clone()]);
        tx.record.value = "2".to_owned();
        assert_eq!(cache.add_transactions([tx]), 0);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("0x01-0").unwrap().record.value, "2");
    }

    #[test]
    fn sorted_newest_first() {
        let mut cache = cache();
        cache.add_transactions([
            vault_tx("0x01", 0, "0x000000000000000000000000000000000000aaaa", 10),
            vault_tx("0x02", 0, "0x000000000000000000000000000000000000aaaa", 30),
            vault_tx("0x03", 0, "0x000000000000000000000000000000000000aaaa", 20),
        ]);
        let stamps: Vec<_> = cache.get_all().iter().map(|t| t.record.timestamp).collect();
        assert_eq!(stamps, vec![30, 20, 10]);
    }

    #[test]
    fn wallet_filter_is_exact_and_case_insensitive() {
        let mut cache = cache();
        cache.add_transactions([
            vault_tx("0x01", 0, "0x000000000000000000000000000000000000AaAa", 1),
            vault_tx("0x02", 0, "0x000000000000000000000000000000000000bbbb", 2),
        ]);
        let found = cache.get_for_wallet("0x000000000000000000000000000000000000AAAA");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record.hash, "0x01");
        assert!(cache
            .get_for_wallet("0x000000000000000000000000000000000000cccc")
            .is_empty());
        // every record involves the vault
        assert_eq!(cache.get_for_wallet(VAULT).len(), 2);
        assert!(cache.contains_hash("0x01"));
        assert!(!cache.contains_hash("0x03"));
    }

    #[test]
    fn checkpoint_is_monotonic_and_stamps_time() {
        let mut cache = cache();
        assert!(cache.should_refetch());
        assert!(cache.set_last_checked_block(100));
        assert!(!cache.set_last_checked_block(90));
        assert_eq!(cache.get_last_checked_block(), 100);
        assert!(cache.last_fetch_time() > 0);
        assert!(!cache.should_refetch());

        let stale = cache.with_stale_after(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        assert!(stale.should_refetch());
    }

    #[test(tokio::test)]
    async fn persists_and_reloads_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = TransactionCache::new("vault", FileBackend::for_scope(dir.path(), "vault"));
        cache.add_transactions([vault_tx(
            "0x01",
            0,
            "0x000000000000000000000000000000000000aaaa",
            1,
        )]);
        cache.set_last_checked_block(1000);
        cache.set_initialized();
        assert!(cache.persist().await);

        let mut reloaded: TransactionCache<VaultTransaction, _> =
            TransactionCache::new("vault", FileBackend::for_scope(dir.path(), "vault"));
        assert!(reloaded.load().await);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get_last_checked_block(), 1000);
        assert!(reloaded.is_initialized());

        reloaded.reset().await;
        assert!(reloaded.is_empty());
        assert_eq!(reloaded.get_last_checked_block(), 0);
        assert!(!reloaded.load().await);
    }

    #[test(tokio::test)]
    async fn persist_failure_keeps_memory_state() {
        let dir = tempfile::tempdir().unwrap();
        // a directory where the document should be makes every write fail
        let blocked = dir.path().join("vault.json");
        std::fs::create_dir_all(blocked.join("x")).unwrap();
        let mut cache = TransactionCache::new("vault", FileBackend::new(blocked));
        cache.add_transactions([vault_tx(
            "0x01",
            0,
            "0x000000000000000000000000000000000000aaaa",
            1,
        )]);
        assert!(!cache.persist().await);
        assert_eq!(cache.len(), 1);
    }
}
