//! Chain access for the vault transaction log.
//!
//! [`ChainReader`] is the seam to the EVM node. [`read_range`] runs the per token and per
//! direction transfer queries of one block window concurrently, and [`Normalizer`] turns the
//! raw transfers into vault or wallet transaction records.
#![warn(missing_docs)]
mod error;
mod http;
mod normalize;
mod reader;
mod retry;
mod types;

pub use error::Error;
pub use http::HttpChainReader;
pub use normalize::{Normalized, Normalizer};
pub use reader::{fetch_decimals, read_range, ChainReader, RangeRead};
pub use retry::{with_retry, RetryConfig};
pub use types::{BlockRange, QueryScope, RawTransfer, TokenContracts, TransferQuery};

/// Result type for chain operations
pub type Result<T> = std::result::Result<T, Error>;
