//! HTTP surface of the transaction sync service.
//!
//! [`router`] serves the wallet and vault transaction lists, accepts provider webhooks and
//! streams new vault transactions to browsers as server-sent events.
#![warn(missing_docs)]
mod error;
mod metrics;
mod server;

pub use error::Error;
pub use metrics::Metrics;
pub use server::{metrics_router, router, ApiState, DynVaultBackend, VaultCache, WalletRefresh};
