use aquaflux_core::{Address, Direction, Token, U256};

use crate::Error;

/// An inclusive range of block heights.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockRange {
    from: u64,
    to: u64,
}

impl BlockRange {
    /// Create a range, `from` must not be above `to`.
    pub fn new(from: u64, to: u64) -> Result<Self, Error> {
        if from > to {
            return Err(Error::new_invalid_arg(anyhow::anyhow!(
                "block range start {from} is above its end {to}"
            )));
        }
        Ok(Self { from, to })
    }

    /// First block of the range
    pub fn from(&self) -> u64 {
        self.from
    }

    /// Last block of the range
    pub fn to(&self) -> u64 {
        self.to
    }

    /// Number of blocks covered
    pub fn len(&self) -> u64 {
        self.to - self.from + 1
    }

    /// A range always covers at least one block.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Split into consecutive windows of at most `max_span` blocks.
    /// A `max_span` of zero is treated as one.
    pub fn chunks(&self, max_span: u64) -> impl Iterator<Item = BlockRange> {
        let span = max_span.max(1);
        let to = self.to;
        let mut next = Some(self.from);
        std::iter::from_fn(move || {
            let from = next?;
            let end = from.saturating_add(span - 1).min(to);
            next = if end < to { Some(end + 1) } else { None };
            Some(BlockRange { from, to: end })
        })
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.from, self.to)
    }
}

/// Contract addresses of the tracked tokens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenContracts {
    /// FLUX token contract
    pub flux: Address,
    /// USDC token contract
    pub usdc: Address,
}

impl TokenContracts {
    /// Contract address of a token
    pub fn get(&self, token: Token) -> &Address {
        match token {
            Token::Flux => &self.flux,
            Token::Usdc => &self.usdc,
        }
    }

    /// Every token with its contract
    pub fn iter(&self) -> impl Iterator<Item = (Token, &Address)> {
        Token::ALL.into_iter().map(move |t| (t, self.get(t)))
    }
}

/// Whose transfers a read covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryScope {
    /// Every transfer into or out of the vault
    Vault,
    /// Transfers between one wallet and the vault
    Wallet(Address),
}

impl QueryScope {
    /// The log queries needed to cover this scope: one per token and direction.
    /// Directions are relative to the vault for [`QueryScope::Vault`] and relative to the
    /// wallet for [`QueryScope::Wallet`].
    pub fn queries(&self, vault: &Address, contracts: &TokenContracts) -> Vec<TransferQuery> {
        contracts
            .iter()
            .flat_map(|(token, contract)| {
                let (incoming, outgoing) = match self {
                    QueryScope::Vault => (
                        TransferQuery {
                            token,
                            contract: contract.clone(),
                            from: None,
                            to: Some(vault.clone()),
                            direction: Direction::Incoming,
                        },
                        TransferQuery {
                            token,
                            contract: contract.clone(),
                            from: Some(vault.clone()),
                            to: None,
                            direction: Direction::Outgoing,
                        },
                    ),
                    QueryScope::Wallet(wallet) => (
                        TransferQuery {
                            token,
                            contract: contract.clone(),
                            from: Some(vault.clone()),
                            to: Some(wallet.clone()),
                            direction: Direction::Incoming,
                        },
                        TransferQuery {
                            token,
                            contract: contract.clone(),
                            from: Some(wallet.clone()),
                            to: Some(vault.clone()),
                            direction: Direction::Outgoing,
                        },
                    ),
                };
                [incoming, outgoing]
            })
            .collect()
    }
}

/// A single `Transfer` log query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferQuery {
    /// Token the contract belongs to
    pub token: Token,
    /// Token contract emitting the logs
    pub contract: Address,
    /// Required sender, any when `None`
    pub from: Option<Address>,
    /// Required recipient, any when `None`
    pub to: Option<Address>,
    /// Direction label given to every match
    pub direction: Direction,
}

/// A `Transfer` log as returned by a [`TransferQuery`], before normalization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawTransfer {
    /// Token of the emitting contract
    pub token: Token,
    /// Direction label of the originating query
    pub direction: Direction,
    /// Transaction hash, 0x prefixed
    pub transaction_hash: String,
    /// Position of the log in its block
    pub log_index: u64,
    /// Block containing the log
    pub block_number: u64,
    /// Sender
    pub from: Address,
    /// Recipient
    pub to: Address,
    /// Amount in the token's smallest unit
    pub raw_value: U256,
}
