use aquaflux_core::{VaultTransaction, WalletTransaction};
use serde::{de::DeserializeOwned, Serialize};

/// A record the cache can store.
pub trait CacheEntry: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Unique key, later writes with the same id replace earlier ones
    fn id(&self) -> &str;
    /// Chain transaction hash, shared by all logs of a transaction
    fn hash(&self) -> &str;
    /// Sort key, milliseconds since the unix epoch
    fn timestamp(&self) -> i64;
    /// Case-insensitive match of an address against the parties of the record
    fn involves(&self, address: &str) -> bool;
}

impl CacheEntry for VaultTransaction {
    fn id(&self) -> &str {
        &self.record.id
    }

    fn hash(&self) -> &str {
        &self.record.hash
    }

    fn timestamp(&self) -> i64 {
        self.record.timestamp
    }

    fn involves(&self, address: &str) -> bool {
        VaultTransaction::involves(self, address)
    }
}

impl CacheEntry for WalletTransaction {
    fn id(&self) -> &str {
        &self.record.id
    }

    fn hash(&self) -> &str {
        &self.record.hash
    }

    fn timestamp(&self) -> i64 {
        self.record.timestamp
    }

    fn involves(&self, address: &str) -> bool {
        WalletTransaction::involves(self, address)
    }
}
