//! pms-node — the Stayline booking core service binary.
//!
//! Startup sequence:
//!   1. Open (or initialize) the sled-backed store
//!   2. Seed the sample property if the store is fresh
//!   3. Load each channel's rate-limit/circuit-breaker operating point
//!   4. Spawn the outbound dispatcher, the reconciliation scheduler, and
//!      the checkout timeout sweeper
//!   5. Wait for a shutdown signal and stop every worker cleanly

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use rand::RngCore;
use tracing::{info, warn};

use pms_channels::AdapterRegistry;
use pms_core::{Channel, DateRange, SystemClock};
use pms_dispatcher::{Dispatcher, DispatcherConfig};
use pms_reconciler::Reconciler;
use pms_resilience::{ChannelLimits, CircuitBreaker, RateLimiter};
use pms_seed::SeedParams;
use pms_store::{BookingEngine, PmsDb};

#[derive(Parser, Debug)]
#[command(name = "pms-node", version, about = "Stayline booking core — direct checkout, channel sync, and reconciliation")]
struct Args {
    /// Directory for the persistent store.
    #[arg(long, env = "STAYLINE_DATA_DIR", default_value = "~/.stayline/data")]
    data_dir: PathBuf,

    /// 64-character hex-encoded key used to seal/unseal channel credentials
    /// at rest. Omit for local bring-up — a random key is generated and
    /// logged as ephemeral, meaning sealed credentials will not survive a
    /// restart.
    #[arg(long, env = "STAYLINE_DEPLOYMENT_KEY")]
    deployment_key: Option<String>,

    #[arg(long, env = "STAYLINE_DISPATCHER_POLL_INTERVAL_MS", default_value_t = 500)]
    dispatcher_poll_interval_ms: u64,

    #[arg(long, env = "STAYLINE_DISPATCHER_BATCH_SIZE", default_value_t = 50)]
    dispatcher_batch_size: usize,

    #[arg(long, env = "STAYLINE_DISPATCHER_MAX_CONCURRENT_PARTITIONS", default_value_t = 16)]
    dispatcher_max_concurrent_partitions: usize,

    /// How often the reconciliation scheduler walks every sync-enabled
    /// channel connection.
    #[arg(long, env = "STAYLINE_RECONCILE_INTERVAL_SECS", default_value_t = 86_400)]
    reconcile_interval_secs: u64,

    #[arg(long, env = "STAYLINE_RECONCILE_WINDOW_PAST_DAYS", default_value_t = pms_core::constants::RECONCILE_WINDOW_PAST_DAYS)]
    reconcile_window_past_days: i64,

    #[arg(long, env = "STAYLINE_RECONCILE_WINDOW_FUTURE_DAYS", default_value_t = pms_core::constants::RECONCILE_WINDOW_FUTURE_DAYS)]
    reconcile_window_future_days: i64,

    #[arg(long, env = "STAYLINE_CHECKOUT_SWEEP_INTERVAL_SECS", default_value_t = 30)]
    checkout_sweep_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".parse().unwrap()))
        .init();

    let args = Args::parse();
    info!("stayline node starting");

    // ── Store ────────────────────────────────────────────────────────────────
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir).with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let db = PmsDb::open(&data_dir).context("opening store")?;
    let engine = Arc::new(BookingEngine::new(db, SystemClock).context("initializing booking engine")?);

    let deployment_key = load_or_generate_deployment_key(args.deployment_key.as_deref())?;

    // ── Sample fixture data ──────────────────────────────────────────────────
    let seed_params = SeedParams::new(deployment_key);
    let seed_summary = pms_seed::apply_seed(&engine, &seed_params).context("seeding sample property")?;
    info!(property_id = %seed_summary.property_id, already_seeded = seed_summary.already_seeded, "sample property ready");

    // ── Resilience primitives ────────────────────────────────────────────────
    let registry = Arc::new(AdapterRegistry::new(deployment_key));
    let circuit = Arc::new(CircuitBreaker::new(SystemClock));
    let rate_limiter = Arc::new(RateLimiter::new(SystemClock));
    for channel in Channel::ALL {
        ChannelLimits::defaults_for(channel).apply(&rate_limiter, &circuit);
    }

    // ── Outbound dispatcher ──────────────────────────────────────────────────
    let dispatcher_config = DispatcherConfig {
        poll_interval: Duration::from_millis(args.dispatcher_poll_interval_ms),
        batch_size: args.dispatcher_batch_size,
        max_concurrent_partitions: args.dispatcher_max_concurrent_partitions,
        credential_refresh_enabled: true,
    };
    // Share the same store — sled's handles are cheap clones internally, so
    // the dispatcher gets its own Arc<PmsDb> without opening a second sled
    // instance against the same data directory.
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(engine.db().clone()),
        Arc::clone(&registry),
        Arc::clone(&circuit),
        Arc::clone(&rate_limiter),
        SystemClock,
        dispatcher_config,
    ));
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let dispatcher_handle = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        async move { dispatcher.run(shutdown_rx).await }
    });

    // ── Reconciliation scheduler ─────────────────────────────────────────────
    let reconcile_handle = tokio::spawn(reconciliation_loop(
        Arc::clone(&engine),
        Arc::clone(&registry),
        Duration::from_secs(args.reconcile_interval_secs),
        args.reconcile_window_past_days,
        args.reconcile_window_future_days,
    ));

    // ── Checkout timeout sweeper ─────────────────────────────────────────────
    let sweep_handle = tokio::spawn(checkout_sweep_loop(Arc::clone(&engine), Duration::from_secs(args.checkout_sweep_interval_secs)));

    info!("node ready");
    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown signal received, stopping workers");

    let _ = shutdown_tx.send(());
    reconcile_handle.abort();
    sweep_handle.abort();
    let _ = dispatcher_handle.await;

    Ok(())
}

/// Periodically walks every sync-enabled channel connection through a
/// reconciliation pass — the safety net behind the dispatcher and the
/// webhook ingress for drift neither of them caught.
async fn reconciliation_loop(engine: Arc<BookingEngine<SystemClock>>, registry: Arc<AdapterRegistry>, interval: Duration, window_past_days: i64, window_future_days: i64) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let now = Utc::now();
        let window = match DateRange::new(now.date_naive() - chrono::Duration::days(window_past_days), now.date_naive() + chrono::Duration::days(window_future_days)) {
            Some(w) => w,
            None => {
                warn!("reconciliation window is empty, skipping this pass");
                continue;
            }
        };

        let connections = match engine.outbox().list_sync_enabled_connections() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "failed to list sync-enabled connections");
                continue;
            }
        };

        let reconciler = Reconciler::new(&engine, &registry);
        for connection in connections {
            match reconciler.reconcile(connection.property_id, connection.channel, window, now).await {
                Ok(report) => info!(property_id = %connection.property_id, channel = %connection.channel, ?report, "reconciliation pass complete"),
                Err(e) => warn!(property_id = %connection.property_id, channel = %connection.channel, error = %e, "reconciliation pass failed"),
            }
        }
    }
}

/// Periodically cancels `reserved` bookings whose checkout session expired
/// without a confirmed payment. Payment provider integration is out of
/// scope here, so every pending session is treated as unconfirmed; a
/// webhook-driven `confirm_payment` racing this sweep wins on its own
/// optimistic-concurrency check regardless.
async fn checkout_sweep_loop(engine: Arc<BookingEngine<SystemClock>>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match engine.checkout_timeout_sweeper(|_| false) {
            Ok(cancelled) if !cancelled.is_empty() => info!(count = cancelled.len(), "checkout timeout sweeper cancelled expired sessions"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "checkout timeout sweeper failed"),
        }
    }
}

/// Decode `--deployment-key` from hex, or generate an ephemeral one.
///
/// # Warning
/// An ephemeral key is **not reproducible**. Credentials sealed under it
/// will not unseal after a restart under a different key. Only use this
/// for local development and testing.
fn load_or_generate_deployment_key(hex_key: Option<&str>) -> anyhow::Result<[u8; 32]> {
    if let Some(h) = hex_key {
        let bytes = hex::decode(h).context("decoding --deployment-key as hex")?;
        return bytes.try_into().map_err(|_| anyhow::anyhow!("--deployment-key must be exactly 32 bytes (64 hex characters)"));
    }
    warn!("no --deployment-key provided, generating an ephemeral one — DO NOT USE IN PRODUCTION");
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    Ok(key)
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
