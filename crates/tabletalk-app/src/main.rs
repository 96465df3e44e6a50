//! Tabletalk application binary - composition root.
//!
//! Ties the Tabletalk crates together into a single executable:
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Initialise tracing
//! 3. Build the dataset registry, capability registry, and intent resolver
//! 4. Start the session dispatcher and its idle-eviction sweeper
//! 5. Serve the axum API until Ctrl-C

mod cli;

use std::sync::Arc;

use clap::Parser;
use tabletalk_api::routes;
use tabletalk_api::state::AppState;
use tabletalk_capability::CapabilityRegistry;
use tabletalk_core::TabletalkConfig;
use tabletalk_dataset::DatasetRegistry;
use tabletalk_dispatch::{KeywordResolver, SessionDispatcher};

use cli::CliArgs;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing starts so its log level can apply.
    let config_file = args.resolve_config_path();
    let loaded = if config_file.exists() {
        Some(TabletalkConfig::load(&config_file))
    } else {
        None
    };
    let mut config = match &loaded {
        Some(Ok(config)) => config.clone(),
        _ => TabletalkConfig::default(),
    };
    config.general.port = args.resolve_port(config.general.port);
    config.general.log_level = args.resolve_log_level(&config.general.log_level);

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Tabletalk v{}", env!("CARGO_PKG_VERSION"));
    match loaded {
        Some(Ok(_)) => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Some(Err(e)) => tracing::warn!(
            path = %config_file.display(),
            error = %e,
            "Failed to load config, using defaults"
        ),
        None => tracing::info!(path = %config_file.display(), "No config file, using defaults"),
    }
    config.validate()?;

    // Registries and resolver.
    let registry = Arc::new(DatasetRegistry::new(&config.dataset, &config.session));
    if !registry.root_dir().is_dir() {
        tracing::warn!(
            root = %registry.root_dir().display(),
            "Dataset root does not exist; every load will fail until it is created"
        );
    } else {
        tracing::info!(root = %registry.root_dir().display(), "Dataset root ready");
    }
    let capabilities = Arc::new(CapabilityRegistry::with_defaults());
    tracing::info!(capabilities = ?capabilities.names(), "Capability registry ready");

    let dispatcher = SessionDispatcher::new(
        registry,
        capabilities,
        Arc::new(KeywordResolver::new()),
        config.dispatch.clone(),
        &config.session,
    );

    // === Background tasks ===

    let sweeper = dispatcher.spawn_idle_sweeper(
        config.session.eviction_interval(),
        config.session.idle_timeout(),
    );
    tracing::info!(
        interval_secs = config.session.eviction_interval_secs,
        idle_timeout_secs = config.session.idle_timeout_secs,
        "Idle-session sweeper started"
    );

    // === API server ===

    let state = AppState::new(dispatcher, config);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let result = routes::start_server(state, shutdown).await;
    sweeper.abort();
    result?;

    tracing::info!("Tabletalk stopped");
    Ok(())
}
