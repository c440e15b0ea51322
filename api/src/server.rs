use std::{convert::Infallible, str::FromStr, sync::Arc};

use anyhow::anyhow;
use aquaflux_cache::{CacheBackend, ScopedCaches};
use aquaflux_chain::ChainReader;
use aquaflux_core::{Address, VaultTransaction, WalletTransaction};
use aquaflux_metrics::MetricsHandle;
use aquaflux_notifier::{IngestReport, Notifier, SharedVaultCache, WebhookIngestor};
use aquaflux_sync::{SyncConfig, Synchronizer};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    middleware,
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    routing::get,
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{metrics::track_requests, Error, Metrics};

/// Backend of the vault cache, chosen at startup.
pub type DynVaultBackend = Box<dyn CacheBackend<VaultTransaction>>;
/// The vault wide cache shared by the sync task, the webhook path and the handlers.
pub type VaultCache = SharedVaultCache<DynVaultBackend>;

/// Chain access used to bring a wallet cache up to date on request.
pub struct WalletRefresh {
    /// Reader shared with the vault sync task
    pub reader: Arc<dyn ChainReader>,
    /// Vault, tokens and windowing
    pub config: SyncConfig,
    /// Metrics of the wallet synchronizers
    pub metrics: aquaflux_sync::Metrics,
}

/// Everything the handlers need. Cheap to clone.
#[derive(Clone)]
pub struct ApiState {
    vault_cache: VaultCache,
    wallet_caches: Arc<ScopedCaches<WalletTransaction>>,
    notifier: Notifier,
    ingestor: Arc<WebhookIngestor<DynVaultBackend>>,
    refresh: Option<Arc<WalletRefresh>>,
}

impl ApiState {
    /// Assemble the state. `ingestor` must write to `vault_cache`.
    pub fn new(
        vault_cache: VaultCache,
        wallet_caches: ScopedCaches<WalletTransaction>,
        notifier: Notifier,
        ingestor: WebhookIngestor<DynVaultBackend>,
    ) -> Self {
        Self {
            vault_cache,
            wallet_caches: Arc::new(wallet_caches),
            notifier,
            ingestor: Arc::new(ingestor),
            refresh: None,
        }
    }

    /// Allow `GET /api/transactions?refresh=true` to sync the wallet before answering.
    pub fn with_wallet_refresh(mut self, refresh: WalletRefresh) -> Self {
        self.refresh = Some(Arc::new(refresh));
        self
    }
}

/// The API routes.
pub fn router(state: ApiState, metrics: Metrics) -> Router {
    Router::new()
        .route(
            "/api/transactions",
            get(get_transactions).post(post_transactions),
        )
        .route("/api/vault-transactions", get(get_vault_transactions))
        .route(
            "/api/webhooks/alchemy",
            get(subscribe).post(receive_webhook),
        )
        .route("/healthz", get(healthz))
        .route("/metrics", get(encode_metrics))
        .route_layer(middleware::from_fn_with_state(metrics, track_requests))
        .with_state(state)
}

/// Only the prometheus endpoint, for a dedicated metrics listener.
pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(encode_metrics))
}

#[derive(Debug, Deserialize)]
struct WalletQuery {
    wallet: Option<String>,
    #[serde(default)]
    refresh: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionList<T> {
    transactions: Vec<T>,
    last_checked_block: u64,
    last_fetch_time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveTransactions {
    wallet_address: Option<String>,
    transactions: Option<Vec<WalletTransaction>>,
    last_checked_block: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveResponse {
    success: bool,
    transaction_count: usize,
}

fn parse_wallet(wallet: &str) -> Result<Address, Error> {
    Address::from_str(wallet).map_err(|err| Error::new_invalid_arg(err.context("invalid wallet address")))
}

fn required_wallet(wallet: Option<&str>) -> Result<Address, Error> {
    match wallet {
        Some(wallet) if !wallet.trim().is_empty() => parse_wallet(wallet),
        _ => Err(Error::new_invalid_arg(anyhow!("wallet address is required"))),
    }
}

async fn get_transactions(
    State(state): State<ApiState>,
    Query(query): Query<WalletQuery>,
) -> Result<Json<TransactionList<WalletTransaction>>, Error> {
    let wallet = required_wallet(query.wallet.as_deref())?;
    let cache = match (&state.refresh, query.refresh) {
        (Some(refresh), true) => {
            let cache = state.wallet_caches.get_or_create(&wallet).await;
            let report = Synchronizer::for_wallet(
                refresh.reader.clone(),
                cache.clone(),
                wallet.clone(),
                refresh.config.clone(),
                refresh.metrics.clone(),
            )
            .sync_once()
            .await;
            debug!(%wallet, new = report.new_transactions.len(), "refreshed wallet");
            cache
        }
        (None, true) => {
            debug!(%wallet, "refresh requested but no chain reader is configured");
            state.wallet_caches.get(&wallet).await
        }
        (_, false) => state.wallet_caches.get(&wallet).await,
    };
    let cache = cache.read().await;
    Ok(Json(TransactionList {
        transactions: cache.get_all(),
        last_checked_block: cache.get_last_checked_block(),
        last_fetch_time: cache.last_fetch_time(),
    }))
}

async fn post_transactions(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<SaveResponse>, Error> {
    let request: SaveTransactions = serde_json::from_slice(&body)
        .map_err(|err| Error::new_invalid_arg(anyhow!("malformed request body: {err}")))?;
    let (Some(wallet), Some(transactions), Some(last_checked_block)) = (
        request.wallet_address.as_deref(),
        request.transactions,
        request.last_checked_block,
    ) else {
        return Err(Error::new_invalid_arg(anyhow!(
            "walletAddress, transactions and lastCheckedBlock are required"
        )));
    };
    let wallet = required_wallet(Some(wallet))?;

    let cache = state.wallet_caches.get_or_create(&wallet).await;
    let mut cache = cache.write().await;
    let added = cache.add_transactions(transactions);
    cache.set_last_checked_block(last_checked_block);
    cache.try_persist().await?;
    info!(%wallet, added, total = cache.len(), last_checked_block, "saved wallet transactions");
    Ok(Json(SaveResponse {
        success: true,
        transaction_count: cache.len(),
    }))
}

async fn get_vault_transactions(
    State(state): State<ApiState>,
    Query(query): Query<WalletQuery>,
) -> Result<Json<TransactionList<VaultTransaction>>, Error> {
    let wallet = match query.wallet.as_deref() {
        Some(wallet) if !wallet.trim().is_empty() => Some(parse_wallet(wallet)?),
        _ => None,
    };
    let cache = state.vault_cache.read().await;
    let transactions = match &wallet {
        Some(wallet) => cache.get_for_wallet(wallet.as_str()),
        None => cache.get_all(),
    };
    Ok(Json(TransactionList {
        transactions,
        last_checked_block: cache.get_last_checked_block(),
        last_fetch_time: cache.last_fetch_time(),
    }))
}

async fn receive_webhook(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestReport>, Error> {
    Ok(Json(state.ingestor.handle(&headers, &body).await?))
}

async fn subscribe(
    State(state): State<ApiState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.notifier.subscribe();
    Sse::new(subscription.map(|event| Ok(Event::default().data(event.to_data()))))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn encode_metrics() -> impl IntoResponse {
    (
        [(
            CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        MetricsHandle::encode(),
    )
}
