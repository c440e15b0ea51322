use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{CacheBackend, CacheEntry, CacheSnapshot, Result};

/// Keeps the snapshot in process memory. Clones share the same state.
/// Nothing survives a restart.
#[derive(Debug)]
pub struct MemoryBackend<T> {
    state: Arc<Mutex<Option<CacheSnapshot<T>>>>,
}

impl<T> Clone for MemoryBackend<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> Default for MemoryBackend<T> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T> MemoryBackend<T> {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<T: CacheEntry> CacheBackend<T> for MemoryBackend<T> {
    async fn load(&self) -> Result<Option<CacheSnapshot<T>>> {
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, snapshot: &CacheSnapshot<T>) -> Result<()> {
        *self.state.lock().await = Some(snapshot.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.state.lock().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use aquaflux_core::VaultTransaction;
    use test_log::test;

    use super::*;

    #[test(tokio::test)]
    async fn clones_share_state() {
        let a = MemoryBackend::<VaultTransaction>::new();
        let b = a.clone();
        assert!(b.load().await.unwrap().is_none());
        a.save(&CacheSnapshot {
            last_checked_block: 3,
            ..Default::default()
        })
        .await
        .unwrap();
        assert_eq!(b.load().await.unwrap().unwrap().last_checked_block, 3);
        b.clear().await.unwrap();
        assert!(a.load().await.unwrap().is_none());
    }
}
