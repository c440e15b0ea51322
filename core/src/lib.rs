//! # AquaFlux Core
//! Data model for the vault transaction log: tokens, addresses, the shared transaction
//! record and its vault and wallet views, and block checkpoints.
#![warn(missing_docs)]
mod address;
mod checkpoint;
mod token;
mod transaction;

pub use address::Address;
pub use checkpoint::{now_millis, Checkpoint};
pub use token::{format_amount, Token, TokenAmountError};
pub use transaction::{
    transaction_id, Direction, TransactionRecord, VaultAction, VaultTransaction,
    WalletTransaction,
};

pub use alloy::primitives::U256;
