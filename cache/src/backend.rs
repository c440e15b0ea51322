use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{CacheEntry, Result};

/// Persisted form of a cache: its transactions and checkpoint.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot<T> {
    /// Wallet of a per wallet cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    /// Highest block already scanned
    #[serde(default)]
    pub last_checked_block: u64,
    /// Time of the last fetch in milliseconds
    #[serde(default)]
    pub last_fetch_time: i64,
    /// Whether the cold start backfill already ran
    #[serde(default)]
    pub initialized: bool,
    /// Every known transaction
    #[serde(default = "Vec::new")]
    pub transactions: Vec<T>,
}

impl<T> Default for CacheSnapshot<T> {
    fn default() -> Self {
        Self {
            wallet_address: None,
            last_checked_block: 0,
            last_fetch_time: 0,
            initialized: false,
            transactions: Vec::new(),
        }
    }
}

impl<T: CacheEntry> CacheSnapshot<T> {
    /// Combine with an older snapshot of the same scope.
    ///
    /// Transactions are merged by id with `self` winning on conflicts. Checkpoint fields keep
    /// the highest value of either side.
    pub fn merge(self, older: CacheSnapshot<T>) -> CacheSnapshot<T> {
        let mut by_id: HashMap<String, T> = older
            .transactions
            .into_iter()
            .map(|tx| (tx.id().to_owned(), tx))
            .collect();
        for tx in self.transactions {
            by_id.insert(tx.id().to_owned(), tx);
        }
        let mut transactions: Vec<T> = by_id.into_values().collect();
        sort_newest_first(&mut transactions);
        CacheSnapshot {
            wallet_address: self.wallet_address.or(older.wallet_address),
            last_checked_block: self.last_checked_block.max(older.last_checked_block),
            last_fetch_time: self.last_fetch_time.max(older.last_fetch_time),
            initialized: self.initialized || older.initialized,
            transactions,
        }
    }
}

/// Order by timestamp descending, ties broken by id so the order is stable.
pub(crate) fn sort_newest_first<T: CacheEntry>(transactions: &mut [T]) {
    transactions.sort_by(|a, b| {
        b.timestamp()
            .cmp(&a.timestamp())
            .then_with(|| a.id().cmp(b.id()))
    });
}

/// Where a [`crate::TransactionCache`] keeps its state between processes or requests.
#[async_trait]
pub trait CacheBackend<T: CacheEntry>: Send + Sync {
    /// Read the stored snapshot, `None` when nothing was stored yet.
    async fn load(&self) -> Result<Option<CacheSnapshot<T>>>;

    /// Store the snapshot.
    async fn save(&self, snapshot: &CacheSnapshot<T>) -> Result<()>;

    /// Remove whatever is stored.
    async fn clear(&self) -> Result<()>;
}

#[async_trait]
impl<T: CacheEntry, B: CacheBackend<T> + ?Sized> CacheBackend<T> for Box<B> {
    async fn load(&self) -> Result<Option<CacheSnapshot<T>>> {
        self.as_ref().load().await
    }

    async fn save(&self, snapshot: &CacheSnapshot<T>) -> Result<()> {
        self.as_ref().save(snapshot).await
    }

    async fn clear(&self) -> Result<()> {
        self.as_ref().clear().await
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use aquaflux_core::{Address, Direction, Token, TransactionRecord, WalletTransaction};

    use super::*;

    fn tx(id: &str, timestamp: i64, value: &str) -> WalletTransaction {
        WalletTransaction {
            record: TransactionRecord {
                id: id.to_owned(),
                hash: id.to_owned(),
                from: Address::from_str("0x000000000000000000000000000000000000aaaa").unwrap(),
                to: Address::from_str("0x00000000000000000000000000000000000000fa").unwrap(),
                value: value.to_owned(),
                token: Token::Usdc,
                direction: Direction::Outgoing,
                timestamp,
                block_number: 1,
            },
        }
    }

    #[test]
    fn merge_prefers_newer_and_keeps_highest_checkpoint() {
        let newer = CacheSnapshot {
            last_checked_block: 10,
            last_fetch_time: 5,
            transactions: vec![tx("a", 1, "2")],
            ..Default::default()
        };
        let older = CacheSnapshot {
            wallet_address: Some("0xaaaa".to_owned()),
            last_checked_block: 20,
            last_fetch_time: 1,
            initialized: true,
            transactions: vec![tx("a", 1, "1"), tx("b", 3, "1")],
        };
        let merged = newer.merge(older);
        assert_eq!(merged.last_checked_block, 20);
        assert_eq!(merged.last_fetch_time, 5);
        assert!(merged.initialized);
        assert_eq!(merged.wallet_address.as_deref(), Some("0xaaaa"));
        let values: Vec<_> = merged
            .transactions
            .iter()
            .map(|t| (t.record.id.as_str(), t.record.value.as_str()))
            .collect();
        assert_eq!(values, vec![("b", "1"), ("a", "2")]);
    }

    #[test]
    fn missing_fields_default() {
        let snapshot: CacheSnapshot<WalletTransaction> =
            serde_json::from_str(r#"{"lastCheckedBlock": 7}"#).unwrap();
        assert_eq!(snapshot.last_checked_block, 7);
        assert!(snapshot.transactions.is_empty());
        assert!(!snapshot.initialized);
    }
}
