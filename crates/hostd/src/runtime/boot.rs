//! Boot — logging init, config load, state creation.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::HostdConfig;
use crate::state::{HostState, SharedState};

/// Initialise a basic tracing subscriber, used only while loading
/// configuration. `serve` replaces it once the configured level is known.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "hostd=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load config and build shared state.
pub async fn boot() -> Result<(SharedState, HostdConfig), Box<dyn std::error::Error>> {
    info!("Starting hostd v{}", env!("CARGO_PKG_VERSION"));

    let config = HostdConfig::load()?;
    info!(
        "Loaded configuration: bind_address={}, hostname={}, is_headnode={}",
        config.bind_address, config.hostname, config.is_headnode
    );

    let state = Arc::new(HostState::new(config.clone()));
    info!("Initialized shared application state, {} cached images found", state.cached_images.len());

    Ok((state, config))
}
