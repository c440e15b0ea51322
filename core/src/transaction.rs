use serde::{Deserialize, Serialize};

use crate::{Address, Token};

/// Build the cache key for a transfer log: `{transaction_hash}-{log_index}`.
///
/// A single transaction may emit transfers for both tokens or in both directions so the
/// transaction hash alone is not unique.
pub fn transaction_id(transaction_hash: &str, log_index: u64) -> String {
    format!("{}-{}", transaction_hash.to_ascii_lowercase(), log_index)
}

/// Direction of a transfer relative to the observer (the vault or a wallet).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Funds arrive at the observer
    Incoming,
    /// Funds leave the observer
    Outgoing,
}

impl Direction {
    /// The same transfer seen from the other side.
    pub fn flip(self) -> Self {
        match self {
            Direction::Incoming => Direction::Outgoing,
            Direction::Outgoing => Direction::Incoming,
        }
    }
}

/// What a transfer means for the vault.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultAction {
    /// A wallet moved funds into the vault
    Deposit,
    /// The vault moved funds out to a wallet
    Withdrawal,
}

impl From<Direction> for VaultAction {
    /// Interprets the direction from the vault's perspective.
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Incoming => VaultAction::Deposit,
            Direction::Outgoing => VaultAction::Withdrawal,
        }
    }
}

/// The fields shared by every view of a token transfer.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    /// Unique per log event, see [`transaction_id`]
    pub id: String,
    /// Hash of the containing chain transaction
    pub hash: String,
    /// Sender address
    pub from: Address,
    /// Recipient address
    pub to: Address,
    /// Decimal adjusted amount
    pub value: String,
    /// Token transferred
    pub token: Token,
    /// Direction relative to the observer of this record
    pub direction: Direction,
    /// Block timestamp in milliseconds since the unix epoch
    pub timestamp: i64,
    /// Block containing the transfer
    pub block_number: u64,
}

impl TransactionRecord {
    /// True when the address is the sender or the recipient.
    pub fn involves(&self, address: &str) -> bool {
        self.from.matches(address) || self.to.matches(address)
    }

    /// The party on the other side of the observer.
    pub fn counterparty(&self) -> &Address {
        match self.direction {
            Direction::Incoming => &self.from,
            Direction::Outgoing => &self.to,
        }
    }
}

/// A transfer between the vault and a wallet, observed by the vault.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultTransaction {
    /// Shared transfer fields, `direction` is relative to the vault
    #[serde(flatten)]
    pub record: TransactionRecord,
    /// Lower case address of the wallet on the other side
    pub wallet_address: String,
    /// Deposit or withdrawal
    #[serde(rename = "type")]
    pub action: VaultAction,
}

impl VaultTransaction {
    /// Build the vault view of a record whose direction is already relative to the vault.
    pub fn from_vault_record(record: TransactionRecord) -> Self {
        let wallet_address = record.counterparty().to_lowercase();
        let action = VaultAction::from(record.direction);
        Self {
            record,
            wallet_address,
            action,
        }
    }

    /// True when the wallet is the counterparty or appears as sender or recipient.
    pub fn involves(&self, address: &str) -> bool {
        self.wallet_address.eq_ignore_ascii_case(address) || self.record.involves(address)
    }

    /// The same transfer as seen by the wallet.
    /// A deposit into the vault is an outgoing transfer for the wallet.
    pub fn to_wallet_view(&self) -> WalletTransaction {
        WalletTransaction {
            record: TransactionRecord {
                direction: self.record.direction.flip(),
                ..self.record.clone()
            },
        }
    }
}

/// A transfer between a wallet and the vault, observed by the wallet.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct WalletTransaction {
    /// Shared transfer fields, `direction` is relative to the wallet
    #[serde(flatten)]
    pub record: TransactionRecord,
}

impl WalletTransaction {
    /// True when the address is the sender or the recipient.
    pub fn involves(&self, address: &str) -> bool {
        self.record.involves(address)
    }

    /// The same transfer as seen by the vault.
    /// Returns `None` when the vault is not a party to the transfer.
    pub fn to_vault_view(&self, vault: &Address) -> Option<VaultTransaction> {
        if !self.record.involves(vault.as_str()) {
            return None;
        }
        let direction = if self.record.to == *vault {
            Direction::Incoming
        } else {
            Direction::Outgoing
        };
        Some(VaultTransaction::from_vault_record(TransactionRecord {
            direction,
            ..self.record.clone()
        }))
    }
}
