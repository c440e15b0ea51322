//! Push path for vault transactions.
//!
//! [`Notifier`] fans server-sent events out to every connected client. [`WebhookIngestor`]
//! verifies provider webhooks with [`WebhookAuth`], records the reported activity in the vault
//! cache and hands the new transactions to the notifier.
#![warn(missing_docs)]
mod auth;
mod error;
mod event;
mod metrics;
mod notifier;
mod webhook;

pub use auth::{WebhookAuth, SIGNATURE_HEADER, TOKEN_HEADER};
pub use error::Error;
pub use event::SseEvent;
pub use metrics::Metrics;
pub use notifier::{BroadcastReport, Notifier, NotifierConfig, Subscription};
pub use webhook::{AlchemyWebhook, IngestReport, SharedVaultCache, WebhookIngestor};

/// Result type for notifier operations
pub type Result<T> = std::result::Result<T, Error>;
