//! Pull path of the vault transaction log.
//!
//! A [`Synchronizer`] drains the blocks produced since the last checkpoint of a cache in
//! bounded windows, moving the checkpoint only past windows that were read completely.
//! [`SyncTask`] runs the vault synchronizer on an interval and broadcasts what it finds.
#![warn(missing_docs)]
mod metrics;
mod synchronizer;
mod task;

#[cfg(test)]
mod tests;

pub use metrics::Metrics;
pub use synchronizer::{
    SyncConfig, SyncEntry, SyncReport, Synchronizer, DEFAULT_BACKFILL_BLOCKS, DEFAULT_MAX_BLOCK_SPAN,
};
pub use task::SyncTask;
