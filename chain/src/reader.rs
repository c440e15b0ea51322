use std::collections::{BTreeMap, BTreeSet, HashMap};

use aquaflux_core::Token;
use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::{BlockRange, RawTransfer, Result, TransferQuery};

/// Read access to the chain the vault lives on.
///
/// Implementations apply their own timeout and retry policy to every call.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Height of the latest block
    async fn latest_block(&self) -> Result<u64>;

    /// Number of decimals of a token contract
    async fn token_decimals(&self, token: Token) -> Result<u8>;

    /// All `Transfer` logs matching the query within the range
    async fn transfers(&self, query: &TransferQuery, range: BlockRange)
        -> Result<Vec<RawTransfer>>;

    /// Timestamp of a block in seconds, `None` when the node does not know the block
    async fn block_timestamp(&self, block: u64) -> Result<Option<u64>>;
}

#[async_trait]
impl<R: ChainReader + ?Sized> ChainReader for std::sync::Arc<R> {
    async fn latest_block(&self) -> Result<u64> {
        self.as_ref().latest_block().await
    }

    async fn token_decimals(&self, token: Token) -> Result<u8> {
        self.as_ref().token_decimals(token).await
    }

    async fn transfers(
        &self,
        query: &TransferQuery,
        range: BlockRange,
    ) -> Result<Vec<RawTransfer>> {
        self.as_ref().transfers(query, range).await
    }

    async fn block_timestamp(&self, block: u64) -> Result<Option<u64>> {
        self.as_ref().block_timestamp(block).await
    }
}

/// Everything read for one block window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRead {
    /// The window that was read
    pub range: BlockRange,
    /// Transfers of every query that succeeded
    pub transfers: Vec<RawTransfer>,
    /// Block timestamps in milliseconds for the blocks of `transfers`
    pub timestamps: BTreeMap<u64, i64>,
    /// Number of transfer queries that failed
    pub failed_queries: usize,
    /// Number of blocks whose timestamp could not be read
    pub missing_timestamps: usize,
}

impl RangeRead {
    /// True when every query and every timestamp lookup succeeded.
    /// Only a complete read may move the checkpoint past `range`.
    pub fn is_complete(&self) -> bool {
        self.failed_queries == 0 && self.missing_timestamps == 0
    }
}

/// Run all `queries` over `range` concurrently, then resolve the timestamp of every block that
/// holds a transfer. A failing query or lookup does not affect the others, it is counted so
/// the caller can tell the read was partial.
pub async fn read_range<R>(reader: &R, queries: &[TransferQuery], range: BlockRange) -> RangeRead
where
    R: ChainReader + ?Sized,
{
    let results = join_all(queries.iter().map(|q| reader.transfers(q, range))).await;

    let mut transfers = Vec::new();
    let mut failed_queries = 0;
    for (query, result) in queries.iter().zip(results) {
        match result {
            Ok(found) => transfers.extend(found),
            Err(err) => {
                warn!(
                    %range,
                    token = %query.token,
                    direction = ?query.direction,
                    %err,
                    "transfer query failed"
                );
                failed_queries += 1;
            }
        }
    }

    let blocks: BTreeSet<u64> = transfers.iter().map(|t| t.block_number).collect();
    let lookups = join_all(
        blocks
            .iter()
            .map(|block| async move { (*block, reader.block_timestamp(*block).await) }),
    )
    .await;

    let mut timestamps = BTreeMap::new();
    let mut missing_timestamps = 0;
    for (block, lookup) in lookups {
        match lookup {
            Ok(Some(seconds)) => {
                timestamps.insert(block, seconds as i64 * 1000);
            }
            Ok(None) => {
                warn!(block, "block not found while resolving timestamp");
                missing_timestamps += 1;
            }
            Err(err) => {
                warn!(block, %err, "failed to resolve block timestamp");
                missing_timestamps += 1;
            }
        }
    }

    debug!(
        %range,
        transfers = transfers.len(),
        failed_queries,
        missing_timestamps,
        "read block range"
    );
    RangeRead {
        range,
        transfers,
        timestamps,
        failed_queries,
        missing_timestamps,
    }
}

/// Look up the decimals of every token concurrently. Tokens whose lookup failed are absent.
pub async fn fetch_decimals<R>(reader: &R, tokens: &[Token]) -> HashMap<Token, u8>
where
    R: ChainReader + ?Sized,
{
    let results = join_all(tokens.iter().map(|t| reader.token_decimals(*t))).await;
    tokens
        .iter()
        .zip(results)
        .filter_map(|(token, result)| match result {
            Ok(decimals) => Some((*token, decimals)),
            Err(err) => {
                warn!(%token, %err, "failed to read token decimals");
                None
            }
        })
        .collect()
}
