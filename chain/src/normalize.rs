use std::collections::{BTreeMap, HashMap};

use aquaflux_core::{
    format_amount, transaction_id, Address, Token, TransactionRecord, VaultTransaction,
    WalletTransaction,
};
use tracing::{debug, warn};

use crate::RawTransfer;

/// Records produced from a batch of raw transfers, with counts of what was left out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized<T> {
    /// Records in input order
    pub records: Vec<T>,
    /// Transfers from the vault to itself
    pub self_transfers: usize,
    /// Transfers whose block timestamp is unknown
    pub missing_timestamps: usize,
    /// Transfers of a token whose decimals are unknown
    pub missing_decimals: usize,
}

impl<T> Normalized<T> {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            self_transfers: 0,
            missing_timestamps: 0,
            missing_decimals: 0,
        }
    }

    /// Transfers that were read but did not produce a record, self transfers excluded.
    pub fn unresolved(&self) -> usize {
        self.missing_timestamps + self.missing_decimals
    }
}

enum Skip {
    SelfTransfer,
    MissingTimestamp,
    MissingDecimals,
}

/// Turns [`RawTransfer`]s into vault or wallet transaction records.
#[derive(Debug)]
pub struct Normalizer<'a> {
    vault: &'a Address,
    decimals: &'a HashMap<Token, u8>,
}

impl<'a> Normalizer<'a> {
    /// Create a normalizer for `vault` using the known token decimals.
    pub fn new(vault: &'a Address, decimals: &'a HashMap<Token, u8>) -> Self {
        Self { vault, decimals }
    }

    fn record(
        &self,
        raw: &RawTransfer,
        timestamps: &BTreeMap<u64, i64>,
    ) -> Result<TransactionRecord, Skip> {
        if raw.from == *self.vault && raw.to == *self.vault {
            return Err(Skip::SelfTransfer);
        }
        let timestamp = *timestamps
            .get(&raw.block_number)
            .ok_or(Skip::MissingTimestamp)?;
        let decimals = *self.decimals.get(&raw.token).ok_or(Skip::MissingDecimals)?;
        let value = format_amount(raw.raw_value, decimals).map_err(|err| {
            warn!(token = %raw.token, %err, "unusable token decimals");
            Skip::MissingDecimals
        })?;
        Ok(TransactionRecord {
            id: transaction_id(&raw.transaction_hash, raw.log_index),
            hash: raw.transaction_hash.to_ascii_lowercase(),
            from: raw.from.clone(),
            to: raw.to.clone(),
            value,
            token: raw.token,
            direction: raw.direction,
            timestamp,
            block_number: raw.block_number,
        })
    }

    fn normalize<T>(
        &self,
        transfers: &[RawTransfer],
        timestamps: &BTreeMap<u64, i64>,
        view: impl Fn(TransactionRecord) -> T,
    ) -> Normalized<T> {
        let mut out = Normalized::new();
        for raw in transfers {
            match self.record(raw, timestamps) {
                Ok(record) => out.records.push(view(record)),
                Err(Skip::SelfTransfer) => out.self_transfers += 1,
                Err(Skip::MissingTimestamp) => out.missing_timestamps += 1,
                Err(Skip::MissingDecimals) => out.missing_decimals += 1,
            }
        }
        if out.self_transfers + out.unresolved() > 0 {
            debug!(
                kept = out.records.len(),
                self_transfers = out.self_transfers,
                missing_timestamps = out.missing_timestamps,
                missing_decimals = out.missing_decimals,
                "dropped transfers during normalization"
            );
        }
        out
    }

    /// Records of transfers read with [`crate::QueryScope::Vault`], directions relative to the vault.
    pub fn vault_transactions(
        &self,
        transfers: &[RawTransfer],
        timestamps: &BTreeMap<u64, i64>,
    ) -> Normalized<VaultTransaction> {
        self.normalize(transfers, timestamps, VaultTransaction::from_vault_record)
    }

    /// Records of transfers read with [`crate::QueryScope::Wallet`], directions relative to the
    /// wallet.
    pub fn wallet_transactions(
        &self,
        transfers: &[RawTransfer],
        timestamps: &BTreeMap<u64, i64>,
    ) -> Normalized<WalletTransaction> {
        self.normalize(transfers, timestamps, |record| WalletTransaction { record })
    }
}
