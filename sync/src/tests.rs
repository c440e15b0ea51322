use std::{
    collections::HashMap,
    str::FromStr,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::anyhow;
use aquaflux_cache::{MemoryBackend, TransactionCache};
use aquaflux_chain::{
    BlockRange, ChainReader, Error as ChainError, RawTransfer, TokenContracts, TransferQuery,
};
use aquaflux_core::{
    Address, Direction, Token, TransactionRecord, VaultTransaction, WalletTransaction, U256,
};
use aquaflux_notifier::{Notifier, NotifierConfig, SseEvent};
use async_trait::async_trait;
use expect_test::expect;
use mockall::mock;
use prometheus_client::registry::Registry;
use shutdown::Shutdown;
use test_log::test;
use tokio::sync::RwLock;

use crate::{Metrics, SyncConfig, SyncTask, Synchronizer};

type Result<T> = aquaflux_chain::Result<T>;
type VaultCache = Arc<RwLock<TransactionCache<VaultTransaction, MemoryBackend<VaultTransaction>>>>;

const VAULT: &str = "0x00000000000000000000000000000000000000fa";
const WALLET: &str = "0x000000000000000000000000000000000000AAAA";
const FLUX: &str = "0x00000000000000000000000000000000000000f1";
const USDC: &str = "0x00000000000000000000000000000000000000c1";

fn addr(s: &str) -> Address {
    Address::from_str(s).unwrap()
}

fn config(max_block_span: u64, backfill_blocks: u64) -> SyncConfig {
    SyncConfig {
        vault: addr(VAULT),
        contracts: TokenContracts {
            flux: addr(FLUX),
            usdc: addr(USDC),
        },
        max_block_span,
        backfill_blocks,
    }
}

fn vault_cache() -> VaultCache {
    Arc::new(RwLock::new(TransactionCache::new(
        "vault",
        MemoryBackend::new(),
    )))
}

fn metrics() -> Metrics {
    Metrics::register(&mut Registry::default())
}

fn deposit(block: u64, raw_value: u64) -> RawTransfer {
    RawTransfer {
        token: Token::Flux,
        // relabelled by the query that matches it
        direction: Direction::Incoming,
        transaction_hash: format!("0x{block:064x}"),
        log_index: 0,
        block_number: block,
        from: addr(WALLET),
        to: addr(VAULT),
        raw_value: U256::from(raw_value),
    }
}

/// An in memory chain answering log queries the way a node filters them.
struct SimulatedChain {
    latest: u64,
    transfers: Vec<RawTransfer>,
    decimals: HashMap<Token, u8>,
    reads: Mutex<Vec<BlockRange>>,
}

impl SimulatedChain {
    fn new(latest: u64, transfers: Vec<RawTransfer>) -> Self {
        Self {
            latest,
            transfers,
            decimals: HashMap::from([(Token::Flux, 18), (Token::Usdc, 6)]),
            reads: Mutex::new(Vec::new()),
        }
    }

    /// Distinct windows that were read, in order
    fn windows(&self) -> Vec<(u64, u64)> {
        let mut windows: Vec<(u64, u64)> = self
            .reads
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.from(), r.to()))
            .collect();
        windows.dedup();
        windows
    }
}

#[async_trait]
impl ChainReader for SimulatedChain {
    async fn latest_block(&self) -> Result<u64> {
        Ok(self.latest)
    }

    async fn token_decimals(&self, token: Token) -> Result<u8> {
        self.decimals
            .get(&token)
            .copied()
            .ok_or_else(|| ChainError::new_app(anyhow!("unknown token")))
    }

    async fn transfers(
        &self,
        query: &TransferQuery,
        range: BlockRange,
    ) -> Result<Vec<RawTransfer>> {
        self.reads.lock().unwrap().push(range);
        Ok(self
            .transfers
            .iter()
            .filter(|t| t.token == query.token)
            .filter(|t| (range.from()..=range.to()).contains(&t.block_number))
            .filter(|t| query.from.as_ref().map_or(true, |from| *from == t.from))
            .filter(|t| query.to.as_ref().map_or(true, |to| *to == t.to))
            .map(|t| RawTransfer {
                direction: query.direction,
                ..t.clone()
            })
            .collect())
    }

    async fn block_timestamp(&self, block: u64) -> Result<Option<u64>> {
        Ok((block <= self.latest).then_some(1_700_000_000 - (self.latest - block) * 12))
    }
}

mock! {
    pub Chain {
        fn latest_block(&self) -> Result<u64>;
        fn token_decimals(&self, token: Token) -> Result<u8>;
        fn transfers(&self, query: &TransferQuery, range: BlockRange) -> Result<Vec<RawTransfer>>;
        fn block_timestamp(&self, block: u64) -> Result<Option<u64>>;
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn latest_block(&self) -> Result<u64> {
        self.latest_block()
    }

    async fn token_decimals(&self, token: Token) -> Result<u8> {
        self.token_decimals(token)
    }

    async fn transfers(
        &self,
        query: &TransferQuery,
        range: BlockRange,
    ) -> Result<Vec<RawTransfer>> {
        self.transfers(query, range)
    }

    async fn block_timestamp(&self, block: u64) -> Result<Option<u64>> {
        self.block_timestamp(block)
    }
}

async fn seed_checkpoint(cache: &VaultCache, block: u64) {
    let mut cache = cache.write().await;
    cache.set_last_checked_block(block);
    cache.set_initialized();
}

#[test(tokio::test)]
async fn backlog_is_drained_in_capped_windows() {
    let chain = Arc::new(SimulatedChain::new(
        450,
        vec![deposit(100, 1), deposit(250, 2), deposit(400, 3)],
    ));
    let cache = vault_cache();
    let sync = Synchronizer::for_vault(chain.clone(), cache.clone(), config(200, 10_000), metrics());

    let report = sync.sync_once().await;
    assert!(report.complete);
    assert_eq!(report.windows, 3);
    assert_eq!(report.last_checked_block, 450);
    assert_eq!(chain.windows(), vec![(0, 199), (200, 399), (400, 450)]);

    let blocks: Vec<u64> = cache
        .read()
        .await
        .get_all()
        .iter()
        .map(|tx| tx.record.block_number)
        .collect();
    assert_eq!(blocks, vec![400, 250, 100]);
    assert_eq!(report.new_transactions.len(), 3);
    assert!(cache.read().await.is_initialized());
}

#[test(tokio::test)]
async fn repeated_cycle_adds_nothing() {
    let chain = Arc::new(SimulatedChain::new(450, vec![deposit(100, 1)]));
    let cache = vault_cache();
    let sync = Synchronizer::for_vault(chain.clone(), cache.clone(), config(200, 10_000), metrics());

    assert_eq!(sync.sync_once().await.new_transactions.len(), 1);
    let again = sync.sync_once().await;
    assert!(again.complete);
    assert_eq!(again.windows, 0);
    assert!(again.new_transactions.is_empty());
    assert_eq!(again.last_checked_block, 450);
    assert_eq!(cache.read().await.len(), 1);
}

#[test(tokio::test)]
async fn single_flux_deposit_end_to_end() {
    let chain = SimulatedChain::new(1000, vec![deposit(1000, 5_000_000_000_000_000_000)]);
    let cache = vault_cache();
    let sync = Synchronizer::for_vault(chain, cache.clone(), config(2_000, 10_000), metrics());

    let report = sync.sync_once().await;
    assert!(report.last_checked_block >= 1000);

    let all = cache.read().await.get_all();
    assert_eq!(all.len(), 1);
    expect![[r#"
        {
          "id": "0x00000000000000000000000000000000000000000000000000000000000003e8-0",
          "hash": "0x00000000000000000000000000000000000000000000000000000000000003e8",
          "from": "0x000000000000000000000000000000000000AAAA",
          "to": "0x00000000000000000000000000000000000000fa",
          "value": "5",
          "token": "FLUX",
          "direction": "incoming",
          "timestamp": 1700000000000,
          "blockNumber": 1000,
          "walletAddress": "0x000000000000000000000000000000000000aaaa",
          "type": "deposit"
        }"#]]
    .assert_eq(&serde_json::to_string_pretty(&all[0]).unwrap());
}

#[test(tokio::test)]
async fn cold_start_backfill_is_bounded() {
    let chain = Arc::new(SimulatedChain::new(50_000, vec![]));
    let sync = Synchronizer::for_vault(chain.clone(), vault_cache(), config(2_000, 10_000), metrics());

    let report = sync.sync_once().await;
    assert!(report.complete);
    assert_eq!(report.windows, 6);
    let windows = chain.windows();
    assert_eq!(windows.first(), Some(&(40_000, 41_999)));
    assert_eq!(windows.last(), Some(&(50_000, 50_000)));
}

#[test(tokio::test)]
async fn wallet_scope_reads_transfers_with_the_vault() {
    let payout = RawTransfer {
        token: Token::Usdc,
        direction: Direction::Outgoing,
        transaction_hash: "0xBEEF".to_owned(),
        log_index: 3,
        block_number: 10,
        from: addr(VAULT),
        to: addr(WALLET),
        raw_value: U256::from(1_500_000u64),
    };
    let unrelated = RawTransfer {
        from: addr(VAULT),
        to: addr("0x000000000000000000000000000000000000bbbb"),
        transaction_hash: "0xcafe".to_owned(),
        ..payout.clone()
    };
    let chain = SimulatedChain::new(20, vec![payout, unrelated]);
    let cache = Arc::new(RwLock::new(
        TransactionCache::new("wallet", MemoryBackend::<WalletTransaction>::new())
            .with_wallet_address(WALLET),
    ));
    let sync = Synchronizer::for_wallet(chain, cache.clone(), addr(WALLET), config(200, 100), metrics());

    let report = sync.sync_once().await;
    assert!(report.complete);
    let all = cache.read().await.get_all();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].record.id, "0xbeef-3");
    assert_eq!(all[0].record.value, "1.5");
    assert_eq!(all[0].record.direction, Direction::Incoming);
    assert_eq!(all[0].record.token, Token::Usdc);
}

#[test(tokio::test)]
async fn latest_block_failure_keeps_cache() {
    let mut chain = MockChain::new();
    chain
        .expect_latest_block()
        .times(1)
        .returning(|| Err(ChainError::new_transient(anyhow!("connection refused"))));
    let cache = vault_cache();
    seed_checkpoint(&cache, 100).await;
    cache
        .write()
        .await
        .add_transactions([VaultTransaction::from_vault_record(TransactionRecord {
            id: "0x01-0".to_owned(),
            hash: "0x01".to_owned(),
            from: addr(WALLET),
            to: addr(VAULT),
            value: "1".to_owned(),
            token: Token::Flux,
            direction: Direction::Incoming,
            timestamp: 1,
            block_number: 90,
        })]);

    let sync = Synchronizer::for_vault(chain, cache.clone(), config(200, 10_000), metrics());
    let report = sync.sync_once().await;
    assert!(!report.complete);
    assert_eq!(report.windows, 0);
    assert_eq!(report.last_checked_block, 100);
    let cache = cache.read().await;
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get_last_checked_block(), 100);
}

#[test(tokio::test)]
async fn failed_window_does_not_advance_checkpoint() {
    let mut chain = MockChain::new();
    chain.expect_latest_block().returning(|| Ok(500));
    chain.expect_token_decimals().returning(|_| Ok(18));
    chain.expect_transfers().returning(|query, range| {
        if range.from() == 301 && query.token == Token::Usdc {
            Err(ChainError::new_transient(anyhow!("timed out")))
        } else {
            Ok(vec![])
        }
    });
    let cache = vault_cache();
    seed_checkpoint(&cache, 100).await;
    let sync = Synchronizer::for_vault(chain, cache.clone(), config(200, 10_000), metrics());

    let report = sync.sync_once().await;
    assert!(!report.complete);
    assert_eq!(report.windows, 2);
    assert_eq!(report.last_checked_block, 300);
    assert_eq!(cache.read().await.get_last_checked_block(), 300);
}

#[test(tokio::test)]
async fn missing_timestamp_keeps_window_open() {
    let mut chain = MockChain::new();
    chain.expect_latest_block().returning(|| Ok(200));
    chain.expect_token_decimals().returning(|_| Ok(18));
    chain.expect_transfers().returning(|query, _| {
        if query.token == Token::Flux && query.direction == Direction::Incoming {
            Ok(vec![deposit(150, 1)])
        } else {
            Ok(vec![])
        }
    });
    chain
        .expect_block_timestamp()
        .times(1)
        .returning(|_| Ok(None));
    let cache = vault_cache();
    seed_checkpoint(&cache, 100).await;
    let sync = Synchronizer::for_vault(chain, cache.clone(), config(200, 10_000), metrics());

    let report = sync.sync_once().await;
    assert!(!report.complete);
    assert!(report.new_transactions.is_empty());
    let cache = cache.read().await;
    assert!(cache.is_empty());
    assert_eq!(cache.get_last_checked_block(), 100);
}

#[test(tokio::test)]
async fn missing_decimals_keeps_window_open() {
    let mut chain = MockChain::new();
    chain.expect_latest_block().returning(|| Ok(200));
    chain
        .expect_token_decimals()
        .returning(|_| Err(ChainError::new_transient(anyhow!("execution reverted"))));
    chain.expect_transfers().returning(|query, _| {
        if query.token == Token::Flux && query.direction == Direction::Incoming {
            Ok(vec![deposit(150, 1)])
        } else {
            Ok(vec![])
        }
    });
    chain.expect_block_timestamp().returning(|_| Ok(Some(1)));
    let cache = vault_cache();
    seed_checkpoint(&cache, 100).await;
    let sync = Synchronizer::for_vault(chain, cache.clone(), config(200, 10_000), metrics());

    let report = sync.sync_once().await;
    assert!(!report.complete);
    assert_eq!(cache.read().await.get_last_checked_block(), 100);
}

#[test(tokio::test)]
async fn sync_task_broadcasts_new_transactions() {
    let chain = SimulatedChain::new(300, vec![deposit(250, 1)]);
    let notifier = Notifier::new(
        NotifierConfig::default(),
        aquaflux_notifier::Metrics::register(&mut Registry::default()),
    );
    let mut sub = notifier.subscribe();
    assert_eq!(sub.recv().await, Some(SseEvent::Connected));

    let shutdown = Shutdown::new();
    let sync = Synchronizer::for_vault(chain, vault_cache(), config(200, 10_000), metrics());
    let task = SyncTask::spawn(sync, notifier.clone(), Duration::from_secs(60), &shutdown);

    let event = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .unwrap();
    match event {
        Some(SseEvent::NewTransactions { transactions }) => {
            assert_eq!(transactions.len(), 1);
            assert_eq!(transactions[0].record.block_number, 250);
        }
        other => panic!("unexpected event {other:?}"),
    }

    shutdown.shutdown();
    tokio::time::timeout(Duration::from_secs(5), task.join())
        .await
        .unwrap();
}
