use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use aquaflux_core::Address;
use tokio::sync::{Mutex, RwLock};

use crate::{CacheEntry, FileBackend, TransactionCache, DEFAULT_STALE_AFTER};

/// A shared per wallet cache.
pub type SharedCache<T> = Arc<RwLock<TransactionCache<T, FileBackend<T>>>>;

/// File backed caches, one per wallet.
///
/// Only wallets with a stored document or a write are held in memory. Lookups of unknown
/// wallets get a fresh empty cache that is dropped with the request.
#[derive(Debug)]
pub struct ScopedCaches<T> {
    data_dir: PathBuf,
    stale_after: Duration,
    caches: Mutex<HashMap<String, SharedCache<T>>>,
}

impl<T: CacheEntry> ScopedCaches<T> {
    /// Keep the wallet documents under `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            stale_after: DEFAULT_STALE_AFTER,
            caches: Mutex::new(HashMap::new()),
        }
    }

    /// Staleness threshold given to every cache created from now on.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// The cache of `wallet` for reading. It is loaded from disk on first access and held
    /// only when a stored document was found.
    pub async fn get(&self, wallet: &Address) -> SharedCache<T> {
        let key = wallet.to_lowercase();
        if let Some(cache) = self.held(&key).await {
            return cache;
        }
        let (cache, stored) = self.open(&key).await;
        if stored {
            self.hold(key, cache).await
        } else {
            cache
        }
    }

    /// The cache of `wallet` for writing. It is always held so concurrent writers share it.
    pub async fn get_or_create(&self, wallet: &Address) -> SharedCache<T> {
        let key = wallet.to_lowercase();
        if let Some(cache) = self.held(&key).await {
            return cache;
        }
        let (cache, _) = self.open(&key).await;
        self.hold(key, cache).await
    }

    async fn held(&self, key: &str) -> Option<SharedCache<T>> {
        self.caches.lock().await.get(key).cloned()
    }

    // Loads without holding the map lock. A cache held in the meantime wins.
    async fn open(&self, key: &str) -> (SharedCache<T>, bool) {
        let mut cache = TransactionCache::new(key, FileBackend::for_scope(&self.data_dir, key))
            .with_wallet_address(key)
            .with_stale_after(self.stale_after);
        let stored = cache.load().await;
        (Arc::new(RwLock::new(cache)), stored)
    }

    async fn hold(&self, key: String, cache: SharedCache<T>) -> SharedCache<T> {
        self.caches.lock().await.entry(key).or_insert(cache).clone()
    }

    /// Drop the in memory cache of `wallet`. Returns true when one was held.
    pub async fn evict(&self, wallet: &Address) -> bool {
        self.caches
            .lock()
            .await
            .remove(&wallet.to_lowercase())
            .is_some()
    }

    /// Number of wallets currently held in memory
    pub async fn len(&self) -> usize {
        self.caches.lock().await.len()
    }

    /// True when no wallet cache is held in memory
    pub async fn is_empty(&self) -> bool {
        self.caches.lock().await.is_empty()
    }
}
