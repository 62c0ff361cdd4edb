use anyhow::{Context, Result};
use qbsync::auth::{AuthenticatorCache, Credentials};
use qbsync::config::TapConfig;
use qbsync::sink::SingerSink;
use qbsync::state::StateStore;
use qbsync::streams::selected_streams;
use qbsync::sync::SyncEngine;
use qbsync::SyncError;
use std::path::PathBuf;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qbsync=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path: PathBuf = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("QBSYNC_CONFIG").ok())
        .context("Usage: qbsync <config.json> (or set QBSYNC_CONFIG)")?
        .into();

    let config = TapConfig::load(&config_path)?;
    info!(
        realm_id = %config.realm_id,
        sandbox = config.sandbox,
        "Configuration loaded"
    );

    // Eager credential selection: an unusable config fails here, before any
    // network call.
    let credentials = Credentials::from_config(&config)?;

    let cache = AuthenticatorCache::new();
    let authenticator = cache.get_or_create(&credentials);

    let state = StateStore::load(config.state_path.clone())
        .context("Failed to load sync state")?;
    let sink = SingerSink::new();

    let streams = selected_streams(config.page_size, config.streams.as_deref())?;
    info!(stream_count = streams.len(), "Starting sync run");

    let mut failed = 0usize;
    for descriptor in streams {
        let engine = SyncEngine::new(descriptor, std::sync::Arc::clone(&authenticator), &config);
        match engine.sync(&state, &sink).await {
            Ok(summary) => {
                info!(
                    stream = %descriptor.name,
                    records = summary.records,
                    pages = summary.pages,
                    "Stream finished"
                );
            }
            Err(e) => {
                // Auth failures poison every remaining stream; stream-local
                // failures leave the other streams running.
                if e.downcast_ref::<SyncError>().is_some_and(SyncError::is_run_fatal) {
                    return Err(e.context(format!("Run aborted in stream {}", descriptor.name)));
                }
                warn!(
                    stream = %descriptor.name,
                    error = %e,
                    "Stream failed; continuing with remaining streams"
                );
                failed += 1;
            }
        }
    }

    state.persist().context("Failed to persist final state")?;

    if failed > 0 {
        anyhow::bail!("{} stream(s) failed", failed);
    }
    info!("Sync run complete");
    Ok(())
}
