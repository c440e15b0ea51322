use alloy::{
    eips::BlockNumberOrTag,
    primitives::{self, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::{BlockTransactionsKind, Filter, Log},
    sol,
    sol_types::SolEvent,
    transports::http::{Client, Http},
};
use anyhow::anyhow;
use aquaflux_core::{Address, Token};
use async_trait::async_trait;
use tracing::{debug, instrument, trace};

use crate::{
    with_retry, BlockRange, ChainReader, Error, RawTransfer, Result, RetryConfig, TokenContracts,
    TransferQuery,
};

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function decimals() external view returns (uint8);
        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}

/// [`ChainReader`] backed by an EVM JSON-RPC endpoint over HTTP.
pub struct HttpChainReader {
    provider: RootProvider<Http<Client>>,
    contracts: TokenContracts,
    retry: RetryConfig,
}

impl std::fmt::Debug for HttpChainReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChainReader")
            .field("contracts", &self.contracts)
            .field("retry", &self.retry)
            .finish()
    }
}

impl HttpChainReader {
    /// Create a reader for the RPC endpoint at `url`.
    pub fn try_new(url: &str, contracts: TokenContracts, retry: RetryConfig) -> Result<Self> {
        retry.validate()?;
        let url = url::Url::parse(url)
            .map_err(|e| Error::new_invalid_arg(anyhow!("invalid rpc url {url}: {e}")))?;
        let provider = ProviderBuilder::new().on_http(url);
        Ok(Self {
            provider,
            contracts,
            retry,
        })
    }

    fn contract_address(&self, token: Token) -> Result<primitives::Address> {
        primitives::Address::try_from(self.contracts.get(token))
            .map_err(|e| Error::new_invalid_arg(anyhow!("{token} contract: {e}")))
    }

    fn filter(query: &TransferQuery, range: BlockRange) -> Result<Filter> {
        let contract = primitives::Address::try_from(&query.contract)
            .map_err(|e| Error::new_invalid_arg(anyhow!("{} contract: {e}", query.token)))?;
        let mut filter = Filter::new()
            .address(contract)
            .event_signature(IERC20::Transfer::SIGNATURE_HASH)
            .from_block(range.from())
            .to_block(range.to());
        if let Some(from) = &query.from {
            let from = primitives::Address::try_from(from)
                .map_err(|e| Error::new_invalid_arg(anyhow!("sender filter: {e}")))?;
            filter = filter.topic1(from.into_word());
        }
        if let Some(to) = &query.to {
            let to = primitives::Address::try_from(to)
                .map_err(|e| Error::new_invalid_arg(anyhow!("recipient filter: {e}")))?;
            filter = filter.topic2(to.into_word());
        }
        Ok(filter)
    }

    /// Decode a `Transfer` log, `None` when the log is pending or not a well formed transfer.
    fn decode(query: &TransferQuery, log: &Log) -> Option<RawTransfer> {
        let topics = log.topics();
        if topics.len() < 3 || topics[0] != IERC20::Transfer::SIGNATURE_HASH {
            return None;
        }
        let data = &log.data().data;
        if data.len() < 32 {
            return None;
        }
        Some(RawTransfer {
            token: query.token,
            direction: query.direction,
            transaction_hash: log.transaction_hash?.to_string(),
            log_index: log.log_index?,
            block_number: log.block_number?,
            from: Address::from(primitives::Address::from_word(topics[1])),
            to: Address::from(primitives::Address::from_word(topics[2])),
            raw_value: U256::try_from_be_slice(&data[..32])?,
        })
    }
}

#[async_trait]
impl ChainReader for HttpChainReader {
    async fn latest_block(&self) -> Result<u64> {
        with_retry(&self.retry, "eth_blockNumber", || async {
            Ok(self.provider.get_block_number().await?)
        })
        .await
    }

    #[instrument(skip(self), level = "debug")]
    async fn token_decimals(&self, token: Token) -> Result<u8> {
        let contract = IERC20::new(self.contract_address(token)?, self.provider.clone());
        with_retry(&self.retry, "decimals", || async {
            Ok(contract.decimals().call().await?._0)
        })
        .await
    }

    #[instrument(skip(self), level = "debug")]
    async fn transfers(
        &self,
        query: &TransferQuery,
        range: BlockRange,
    ) -> Result<Vec<RawTransfer>> {
        let filter = Self::filter(query, range)?;
        let logs = with_retry(&self.retry, "eth_getLogs", || async {
            Ok(self.provider.get_logs(&filter).await?)
        })
        .await?;
        let total = logs.len();
        let transfers: Vec<RawTransfer> = logs
            .iter()
            .filter_map(|log| Self::decode(query, log))
            .collect();
        if transfers.len() != total {
            debug!(
                skipped = total - transfers.len(),
                "ignored pending or malformed transfer logs"
            );
        }
        trace!(count = transfers.len(), "fetched transfer logs");
        Ok(transfers)
    }

    async fn block_timestamp(&self, block: u64) -> Result<Option<u64>> {
        let block = with_retry(&self.retry, "eth_getBlockByNumber", || async {
            Ok(self
                .provider
                .get_block_by_number(
                    BlockNumberOrTag::Number(block),
                    BlockTransactionsKind::Hashes.into(),
                )
                .await?)
        })
        .await?;
        Ok(block.map(|b| b.header.timestamp))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use alloy::primitives::{Bytes, LogData, B256};
    use aquaflux_core::Direction;

    use super::*;

    fn query() -> TransferQuery {
        TransferQuery {
            token: Token::Flux,
            contract: Address::from_str("0x0000000000000000000000000000000000000f01").unwrap(),
            from: None,
            to: Some(Address::from_str("0x00000000000000000000000000000000000000fa").unwrap()),
            direction: Direction::Incoming,
        }
    }

    fn transfer_log(block_number: Option<u64>) -> Log {
        let from = primitives::Address::repeat_byte(0xaa);
        let to = primitives::Address::repeat_byte(0xfa);
        let value = U256::from(5u64) * U256::from(10u64).pow(U256::from(18u64));
        Log {
            inner: primitives::Log {
                address: primitives::Address::repeat_byte(0x01),
                data: LogData::new_unchecked(
                    vec![
                        IERC20::Transfer::SIGNATURE_HASH,
                        from.into_word(),
                        to.into_word(),
                    ],
                    Bytes::from(value.to_be_bytes::<32>().to_vec()),
                ),
            },
            block_number,
            transaction_hash: Some(B256::repeat_byte(0x11)),
            log_index: Some(2),
            ..Default::default()
        }
    }

    #[test]
    fn decodes_transfer_logs() {
        let raw = HttpChainReader::decode(&query(), &transfer_log(Some(42))).unwrap();
        assert_eq!(raw.block_number, 42);
        assert_eq!(raw.log_index, 2);
        assert_eq!(
            raw.from,
            Address::from_str("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap()
        );
        assert_eq!(raw.direction, Direction::Incoming);
        assert_eq!(raw.raw_value, U256::from(5_000_000_000_000_000_000u64));
        assert_eq!(raw.transaction_hash, format!("{}", B256::repeat_byte(0x11)));
    }

    #[test]
    fn pending_logs_are_skipped() {
        assert!(HttpChainReader::decode(&query(), &transfer_log(None)).is_none());
    }

    #[test]
    fn rejects_bad_url() {
        let contracts = TokenContracts {
            flux: query().contract,
            usdc: query().contract,
        };
        assert!(HttpChainReader::try_new("not a url", contracts, RetryConfig::default()).is_err());
    }
}
