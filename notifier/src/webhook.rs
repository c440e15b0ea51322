use std::{collections::HashSet, str::FromStr, sync::Arc};

use anyhow::anyhow;
use aquaflux_cache::{CacheBackend, TransactionCache};
use aquaflux_core::{
    format_amount, now_millis, transaction_id, Address, Direction, Token, TransactionRecord,
    VaultTransaction, U256,
};
use aquaflux_metrics::Recorder;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::{metrics::WebhookOutcome, Error, Metrics, Notifier, Result, WebhookAuth};

/// The vault cache shared between the sync loop and the webhook.
pub type SharedVaultCache<B> = Arc<RwLock<TransactionCache<VaultTransaction, B>>>;

/// Address activity notification as posted by the provider.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlchemyWebhook {
    /// Id of the webhook configuration
    pub webhook_id: String,
    /// Id of this notification
    pub id: String,
    /// RFC 3339 creation time
    pub created_at: String,
    /// Notification type, e.g. `ADDRESS_ACTIVITY`
    #[serde(rename = "type")]
    pub kind: String,
    /// The reported activity
    pub event: WebhookEvent,
}

/// Body of a notification.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    /// Network name, e.g. `ETH_MAINNET`
    #[serde(default)]
    pub network: Option<String>,
    /// Transfers seen on the watched addresses
    #[serde(default)]
    pub activity: Vec<Activity>,
}

/// One transfer in a notification.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Sender
    pub from_address: String,
    /// Recipient
    pub to_address: String,
    /// Block number as 0x prefixed hex
    #[serde(default)]
    pub block_num: Option<String>,
    /// Transaction hash
    pub hash: String,
    /// Decimal adjusted amount
    #[serde(default)]
    pub value: Option<f64>,
    /// Token symbol
    #[serde(default)]
    pub asset: Option<String>,
    /// Contract details of token transfers
    #[serde(default)]
    pub raw_contract: Option<RawContract>,
    /// The emitted log of token transfers
    #[serde(default)]
    pub log: Option<ActivityLog>,
}

/// Contract details of a token transfer.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawContract {
    /// Amount in the token's smallest unit as 0x prefixed hex
    #[serde(default)]
    pub raw_value: Option<String>,
    /// Token decimals
    #[serde(default)]
    pub decimals: Option<u8>,
}

/// The emitted log of a token transfer.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLog {
    /// Position of the log in its block as 0x prefixed hex
    #[serde(default)]
    pub log_index: Option<String>,
}

/// Response to an accepted webhook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Always true, failures are reported as errors
    pub success: bool,
    /// Number of new transactions recorded and broadcast
    pub processed: usize,
    /// Number of activity entries in the notification
    pub total: usize,
}

fn parse_hex_u64(value: &str) -> Option<u64> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(digits, 16).ok()
}

/// Verifies, records and broadcasts provider webhooks.
pub struct WebhookIngestor<B> {
    vault: Address,
    auth: WebhookAuth,
    cache: SharedVaultCache<B>,
    notifier: Notifier,
    metrics: Metrics,
}

impl<B> std::fmt::Debug for WebhookIngestor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookIngestor")
            .field("vault", &self.vault)
            .field("auth", &self.auth)
            .finish()
    }
}

impl<B: CacheBackend<VaultTransaction>> WebhookIngestor<B> {
    /// Create an ingestor for activity involving `vault`.
    pub fn new(
        vault: Address,
        auth: WebhookAuth,
        cache: SharedVaultCache<B>,
        notifier: Notifier,
        metrics: Metrics,
    ) -> Self {
        if auth.is_open() {
            warn!("webhook accepts unauthenticated requests, do not run this configuration in production");
        }
        Self {
            vault,
            auth,
            cache,
            notifier,
            metrics,
        }
    }

    /// Handle a webhook request.
    ///
    /// Credentials are verified and the payload is parsed before anything is changed, so a
    /// rejected request leaves the cache untouched.
    #[instrument(skip_all, level = "debug")]
    pub async fn handle(&self, headers: &HeaderMap, body: &[u8]) -> Result<IngestReport> {
        if let Err(err) = self.auth.verify(headers, body) {
            warn!(%err, "rejected webhook");
            self.metrics.record(&WebhookOutcome("unauthorized"));
            return Err(err);
        }
        let payload: AlchemyWebhook = match serde_json::from_slice(body) {
            Ok(payload) => payload,
            Err(err) => {
                self.metrics.record(&WebhookOutcome("malformed"));
                return Err(Error::new_invalid_arg(anyhow!("malformed webhook payload: {err}")));
            }
        };
        let report = self.ingest(&payload).await;
        self.metrics.record(&WebhookOutcome("accepted"));
        Ok(report)
    }

    /// Record the vault transactions of a verified notification and broadcast the new ones.
    pub async fn ingest(&self, payload: &AlchemyWebhook) -> IngestReport {
        let total = payload.event.activity.len();
        let timestamp = chrono::DateTime::parse_from_rfc3339(&payload.created_at)
            .map(|t| t.timestamp_millis())
            .unwrap_or_else(|_| now_millis());
        let candidates: Vec<VaultTransaction> = payload
            .event
            .activity
            .iter()
            .filter_map(|activity| self.normalize(activity, timestamp))
            .collect();

        let fresh = {
            let mut cache = self.cache.write().await;
            let mut seen = HashSet::new();
            let fresh: Vec<VaultTransaction> = candidates
                .into_iter()
                .filter(|tx| !cache.contains_hash(&tx.record.hash))
                .filter(|tx| seen.insert(tx.record.id.clone()))
                .collect();
            if !fresh.is_empty() {
                cache.add_transactions(fresh.iter().cloned());
                cache.persist().await;
            }
            fresh
        };

        let broadcast = self.notifier.broadcast_transactions(&fresh);
        info!(
            webhook_id = %payload.webhook_id,
            notification = %payload.id,
            network = payload.event.network.as_deref().unwrap_or("unknown"),
            total,
            processed = fresh.len(),
            delivered = broadcast.delivered,
            "ingested webhook"
        );
        IngestReport {
            success: true,
            processed: fresh.len(),
            total,
        }
    }

    /// The vault view of an activity entry, `None` when it is not a FLUX or USDC transfer
    /// between the vault and another address.
    fn normalize(&self, activity: &Activity, timestamp: i64) -> Option<VaultTransaction> {
        let token = Token::from_str(activity.asset.as_deref()?).ok()?;
        let from = Address::from_str(&activity.from_address).ok()?;
        let to = Address::from_str(&activity.to_address).ok()?;
        let direction = match (from == self.vault, to == self.vault) {
            (true, false) => Direction::Outgoing,
            (false, true) => Direction::Incoming,
            _ => {
                debug!(hash = %activity.hash, "skipping activity not between the vault and a wallet");
                return None;
            }
        };
        let value = Self::value(activity)?;
        // Without its log position the transfer cannot get the id the chain reader assigns,
        // so it is left to the next sync cycle.
        let log_index = activity
            .log
            .as_ref()
            .and_then(|log| log.log_index.as_deref())
            .and_then(parse_hex_u64);
        let block_number = activity.block_num.as_deref().and_then(parse_hex_u64);
        let (Some(log_index), Some(block_number)) = (log_index, block_number) else {
            debug!(hash = %activity.hash, "skipping activity without log index or block number");
            return None;
        };
        Some(VaultTransaction::from_vault_record(TransactionRecord {
            id: transaction_id(&activity.hash, log_index),
            hash: activity.hash.to_ascii_lowercase(),
            from,
            to,
            value,
            token,
            direction,
            timestamp,
            block_number,
        }))
    }

    /// Exact amount from the raw contract value when available, the reported decimal value
    /// otherwise.
    fn value(activity: &Activity) -> Option<String> {
        let exact = activity.raw_contract.as_ref().and_then(|raw| {
            let digits = raw.raw_value.as_deref()?;
            let digits = digits.strip_prefix("0x").unwrap_or(digits);
            let raw_value = U256::from_str_radix(digits, 16).ok()?;
            format_amount(raw_value, raw.decimals?).ok()
        });
        exact.or_else(|| activity.value.map(|v| v.to_string()))
    }
}
