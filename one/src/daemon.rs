use std::{fmt, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use aquaflux_api::{router, ApiState, DynVaultBackend, VaultCache, WalletRefresh};
use aquaflux_cache::{BackendMetricsMiddleware, FileBackend, MemoryBackend, TransactionCache};
use aquaflux_chain::ChainReader;
use aquaflux_core::VaultTransaction;
use aquaflux_metrics::{config::Config as MetricsConfig, MetricsHandle};
use aquaflux_notifier::{Notifier, NotifierConfig, WebhookAuth, WebhookIngestor};
use aquaflux_sync::{SyncTask, Synchronizer};
use clap::{Args, ValueEnum};
use shutdown::Shutdown;
use signal_hook::consts::signal::*;
use signal_hook_tokio::Signals;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{handle_signals, metrics, ChainOpts, LogOpts, StoreOpts};

#[derive(Args, Debug)]
pub struct DaemonOpts {
    #[command(flatten)]
    chain: ChainOpts,

    #[command(flatten)]
    store: StoreOpts,

    #[command(flatten)]
    webhook: WebhookOpts,

    /// Bind address of the API endpoint.
    #[arg(long, default_value = "127.0.0.1:3000", env = "AQUAFLUX_BIND_ADDRESS")]
    bind_address: String,

    /// Bind address of the metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9464", env = "AQUAFLUX_METRICS_BIND_ADDRESS")]
    metrics_bind_address: String,

    /// Where the vault cache is kept.
    #[arg(long, default_value = "file", env = "AQUAFLUX_VAULT_CACHE")]
    vault_cache: VaultCacheKind,

    /// Seconds between two vault sync cycles.
    #[arg(long, default_value_t = 30, env = "AQUAFLUX_POLL_INTERVAL_SECS")]
    poll_interval_secs: u64,

    /// Seconds between heartbeats on an idle event stream.
    #[arg(long, default_value_t = 30, env = "AQUAFLUX_HEARTBEAT_INTERVAL_SECS")]
    heartbeat_interval_secs: u64,

    /// When true metrics will be exported
    #[arg(long, default_value_t = false, env = "AQUAFLUX_METRICS")]
    metrics: bool,

    /// When true traces will be exported
    #[arg(long, default_value_t = false, env = "AQUAFLUX_TRACING")]
    tracing: bool,

    #[command(flatten)]
    log_opts: LogOpts,
}

#[derive(Args)]
struct WebhookOpts {
    /// Key used to verify the HMAC-SHA256 signature of webhook bodies.
    #[arg(long, env = "AQUAFLUX_WEBHOOK_SIGNING_KEY")]
    webhook_signing_key: Option<String>,

    /// Shared token webhook requests must present.
    #[arg(long, env = "AQUAFLUX_WEBHOOK_AUTH_TOKEN")]
    webhook_auth_token: Option<String>,

    /// Accept webhooks without any verification when no key or token is set.
    /// Only for local development.
    #[arg(long, default_value_t = false, env = "AQUAFLUX_ALLOW_UNAUTHENTICATED_WEBHOOKS")]
    allow_unauthenticated_webhooks: bool,
}

impl fmt::Debug for WebhookOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookOpts")
            .field(
                "webhook_signing_key",
                &self.webhook_signing_key.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "webhook_auth_token",
                &self.webhook_auth_token.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "allow_unauthenticated_webhooks",
                &self.allow_unauthenticated_webhooks,
            )
            .finish()
    }
}

impl WebhookOpts {
    fn auth(&self) -> WebhookAuth {
        WebhookAuth::new(
            self.webhook_signing_key.clone(),
            self.webhook_auth_token.clone(),
            self.allow_unauthenticated_webhooks,
        )
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
enum VaultCacheKind {
    /// JSON file in the data directory, survives restarts.
    #[default]
    File,
    /// Process memory only, the vault is backfilled after every restart.
    Memory,
}

impl DaemonOpts {
    fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    fn notifier_config(&self) -> NotifierConfig {
        NotifierConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            ..Default::default()
        }
    }

    fn vault_backend(&self, metrics: aquaflux_cache::Metrics) -> DynVaultBackend {
        match self.vault_cache {
            VaultCacheKind::File => Box::new(BackendMetricsMiddleware::new(
                FileBackend::<VaultTransaction>::for_scope(&self.store.data_dir, "vault"),
                metrics,
            )),
            VaultCacheKind::Memory => Box::new(BackendMetricsMiddleware::new(
                MemoryBackend::<VaultTransaction>::new(),
                metrics,
            )),
        }
    }
}

fn parse_addr(name: &str, addr: &str) -> Result<SocketAddr> {
    addr.parse().map_err(|e| anyhow!("invalid {name} {addr}: {e}"))
}

/// Start the daemon process
pub async fn run(opts: DaemonOpts) -> Result<()> {
    let info = metrics::Info::new();

    let mut metrics_config = MetricsConfig {
        export: opts.metrics,
        tracing: opts.tracing,
        log_format: opts.log_opts.format(),
        ..Default::default()
    };
    info.apply_to_metrics_config(&mut metrics_config);

    MetricsHandle::register(|registry| metrics::Metrics::register(&info, registry));
    let cache_metrics = MetricsHandle::register(aquaflux_cache::Metrics::register);
    let sync_metrics = MetricsHandle::register(aquaflux_sync::Metrics::register);
    let notifier_metrics = MetricsHandle::register(aquaflux_notifier::Metrics::register);
    let http_metrics = MetricsHandle::register(aquaflux_api::Metrics::register);

    // Logging, tracing and metrics are initialized here,
    // debug, info etc will not work until after this line
    let metrics_handle = MetricsHandle::new(metrics_config)
        .await
        .map_err(|e| anyhow!("failed to initialize metrics: {e}"))?;
    info!(
        service__name = info.service_name,
        version = info.version,
        instance_id = info.instance_id,
    );
    debug!(?opts, "using daemon options");

    let bind_address = parse_addr("bind address", &opts.bind_address)?;
    let metrics_bind_address = parse_addr("metrics bind address", &opts.metrics_bind_address)?;
    opts.store.ensure_data_dir().await?;

    let sync_config = opts.chain.sync_config();
    let reader: Arc<dyn ChainReader> = Arc::new(opts.chain.reader()?);

    let mut cache: TransactionCache<VaultTransaction, DynVaultBackend> =
        TransactionCache::new("vault", opts.vault_backend(cache_metrics))
            .with_stale_after(opts.store.stale_after());
    cache.load().await;
    let vault_cache: VaultCache = Arc::new(RwLock::new(cache));

    let notifier = Notifier::new(opts.notifier_config(), notifier_metrics.clone());
    let auth = opts.webhook.auth();
    if auth.is_unconfigured() && !opts.webhook.allow_unauthenticated_webhooks {
        warn!("no webhook signing key or auth token configured, webhook requests will be rejected");
    }
    let ingestor = WebhookIngestor::new(
        sync_config.vault.clone(),
        auth,
        vault_cache.clone(),
        notifier.clone(),
        notifier_metrics,
    );
    let state = ApiState::new(
        vault_cache.clone(),
        opts.store.wallet_caches(),
        notifier.clone(),
        ingestor,
    )
    .with_wallet_refresh(WalletRefresh {
        reader: reader.clone(),
        config: sync_config.clone(),
        metrics: sync_metrics.clone(),
    });

    // Every listener subscribes before the signal handler can fire.
    let shutdown = Shutdown::new();
    let api_shutdown = shutdown.wait_fut();
    let metrics_shutdown = shutdown.wait_fut();

    let sync_task = SyncTask::spawn(
        Synchronizer::for_vault(reader, vault_cache.clone(), sync_config, sync_metrics),
        notifier.clone(),
        opts.poll_interval(),
        &shutdown,
    );

    info!(address = %metrics_bind_address, "starting prometheus metrics server");
    let metrics_server_handle = metrics::start(&metrics_bind_address, metrics_shutdown)
        .map_err(|e| {
            anyhow!(
                "Failed to start metrics server using address: {}. {}",
                opts.metrics_bind_address,
                e
            )
        })?;

    let signals = Signals::new([SIGHUP, SIGTERM, SIGINT, SIGQUIT])?;
    let handle = signals.handle();
    debug!("starting signal handler task");
    let signals_handle = tokio::spawn(handle_signals(signals, shutdown.clone()));

    // The server task blocks until we are ready to start shutdown
    info!(address = %bind_address, "starting api server");
    let stream_notifier = notifier.clone();
    axum::Server::try_bind(&bind_address)
        .map_err(|e| anyhow!("Failed to bind address: {}. {}", opts.bind_address, e))?
        .serve(router(state, http_metrics).into_make_service())
        .with_graceful_shutdown(async move {
            api_shutdown.await;
            // Open event streams would hold the graceful shutdown forever.
            stream_notifier.disconnect_all();
        })
        .await?;
    debug!("api server finished, starting shutdown...");

    shutdown.shutdown();
    sync_task.join().await;
    debug!("vault sync stopped");
    if !vault_cache.read().await.persist().await {
        warn!("final vault cache persist failed");
    }

    match metrics_server_handle.await? {
        Ok(()) => {}
        Err(err) => warn!(%err, "metrics server task error"),
    }
    metrics_handle.shutdown();
    debug!("metrics server stopped");

    // Wait for signal handler to finish
    handle.close();
    signals_handle.await?;
    debug!("signal handler stopped");

    Ok(())
}
