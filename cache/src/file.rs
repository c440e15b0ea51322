use std::{
    marker::PhantomData,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{CacheBackend, CacheEntry, CacheSnapshot, Error, Result};

/// Keeps a snapshot as a JSON document on disk.
///
/// Saving merges with the document already on disk before writing it back. Two processes
/// saving the same scope concurrently may still lose each other's updates; the chain stays
/// the source of truth and a later sync restores anything lost.
#[derive(Debug)]
pub struct FileBackend<T> {
    path: PathBuf,
    _entry: PhantomData<fn() -> T>,
}

impl<T> Clone for FileBackend<T> {
    fn clone(&self) -> Self {
        Self::new(self.path.clone())
    }
}

impl<T> FileBackend<T> {
    /// Store the snapshot at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _entry: PhantomData,
        }
    }

    /// Store the snapshot of `scope` as `<data_dir>/<scope in lower case>.json`.
    pub fn for_scope(data_dir: impl AsRef<Path>, scope: &str) -> Self {
        Self::new(
            data_dir
                .as_ref()
                .join(format!("{}.json", scope.to_ascii_lowercase())),
        )
    }

    /// Location of the document
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Option<CacheSnapshot<T>>>
    where
        T: CacheEntry,
    {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::from(e).context(format!("reading {:?}", self.path))),
        };
        let snapshot = serde_json::from_slice(&bytes)
            .map_err(|e| Error::from(e).context(format!("parsing {:?}", self.path)))?;
        Ok(Some(snapshot))
    }
}

#[async_trait]
impl<T: CacheEntry> CacheBackend<T> for FileBackend<T> {
    async fn load(&self) -> Result<Option<CacheSnapshot<T>>> {
        self.read().await
    }

    async fn save(&self, snapshot: &CacheSnapshot<T>) -> Result<()> {
        let merged = match self.read().await {
            Ok(Some(on_disk)) => snapshot.clone().merge(on_disk),
            Ok(None) => snapshot.clone(),
            Err(err) => {
                warn!(path = ?self.path, %err, "replacing unreadable cache document");
                snapshot.clone()
            }
        };
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let bytes = serde_json::to_vec_pretty(&merged)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(
            path = ?self.path,
            transactions = merged.transactions.len(),
            last_checked_block = merged.last_checked_block,
            "saved cache document"
        );
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use aquaflux_core::{Address, Direction, Token, TransactionRecord, WalletTransaction};
    use expect_test::expect;
    use test_log::test;

    use super::*;

    fn tx(id: &str, timestamp: i64) -> WalletTransaction {
        WalletTransaction {
            record: TransactionRecord {
                id: id.to_owned(),
                hash: "0xabc".to_owned(),
                from: Address::from_str("0x000000000000000000000000000000000000AaAa").unwrap(),
                to: Address::from_str("0x00000000000000000000000000000000000000fa").unwrap(),
                value: "1.5".to_owned(),
                token: Token::Usdc,
                direction: Direction::Outgoing,
                timestamp,
                block_number: 12,
            },
        }
    }

    #[test]
    fn scope_file_name_is_lower_case() {
        let backend = FileBackend::<WalletTransaction>::for_scope("/data", "0xAbC");
        assert_eq!(backend.path(), Path::new("/data/0xabc.json"));
    }

    #[test(tokio::test)]
    async fn missing_document_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::<WalletTransaction>::for_scope(dir.path(), "vault");
        assert!(backend.load().await.unwrap().is_none());
        backend.clear().await.unwrap();
    }

    #[test(tokio::test)]
    async fn save_merges_with_document_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::for_scope(dir.path().join("nested"), "0xAAAA");

        backend
            .save(&CacheSnapshot {
                wallet_address: Some("0xaaaa".to_owned()),
                last_checked_block: 50,
                last_fetch_time: 1,
                initialized: true,
                transactions: vec![tx("0xabc-0", 1_000)],
            })
            .await
            .unwrap();
        // a second writer that never saw the first transaction
        backend
            .save(&CacheSnapshot {
                last_checked_block: 40,
                last_fetch_time: 2,
                transactions: vec![tx("0xabc-1", 2_000)],
                ..Default::default()
            })
            .await
            .unwrap();

        let loaded = backend.load().await.unwrap().unwrap();
        assert_eq!(loaded.last_checked_block, 50);
        assert_eq!(loaded.last_fetch_time, 2);
        let ids: Vec<_> = loaded.transactions.iter().map(|t| t.record.id.clone()).collect();
        assert_eq!(ids, vec!["0xabc-1", "0xabc-0"]);
    }

    #[test(tokio::test)]
    async fn document_layout() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::for_scope(dir.path(), "0xaaaa");
        backend
            .save(&CacheSnapshot {
                wallet_address: Some("0xaaaa".to_owned()),
                last_checked_block: 12,
                last_fetch_time: 1_700_000_000_000,
                initialized: true,
                transactions: vec![tx("0xabc-0", 1_700_000_000_000)],
            })
            .await
            .unwrap();
        let text = tokio::fs::read_to_string(backend.path()).await.unwrap();
        expect![[r#"
            {
              "walletAddress": "0xaaaa",
              "lastCheckedBlock": 12,
              "lastFetchTime": 1700000000000,
              "initialized": true,
              "transactions": [
                {
                  "id": "0xabc-0",
                  "hash": "0xabc",
                  "from": "0x000000000000000000000000000000000000AaAa",
                  "to": "0x00000000000000000000000000000000000000fa",
                  "value": "1.5",
                  "token": "USDC",
                  "direction": "outgoing",
                  "timestamp": 1700000000000,
                  "blockNumber": 12
                }
              ]
            }"#]]
        .assert_eq(&text);
    }

    #[test(tokio::test)]
    async fn corrupt_document_is_replaced_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::<WalletTransaction>::for_scope(dir.path(), "vault");
        tokio::fs::write(backend.path(), b"{not json").await.unwrap();
        assert!(matches!(
            backend.load().await,
            Err(Error::Application { .. })
        ));
        backend
            .save(&CacheSnapshot {
                transactions: vec![tx("0xabc-0", 1)],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(backend.load().await.unwrap().unwrap().transactions.len(), 1);
    }
}
