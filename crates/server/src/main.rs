mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prewire_core::config::OutputClass;
use prewire_core::relparse::CommandClassifier;
use prewire_core::session::{LineHandler, SessionManager, Transport};
use prewire_core::store;
use prewire_core::{
    load_config, validate_config, Broadcaster, EventSink, IngestPipeline, MetadataEnricher,
    NukeLedger, OutputRoute, ReleaseClassifier, ReleaseStore,
};

use transport::IrcTransport;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("PREWIRE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    info!("Networks configured: {}", config.networks.len());

    let conn = store::open(&config.database.path).context("Failed to open database")?;

    let transport: Arc<dyn Transport> = Arc::new(IrcTransport);
    let sessions = SessionManager::new(transport, &config.session);

    // Output sessions first: the broadcaster needs their queues.
    let mut routes = Vec::new();
    let mut tasks = Vec::new();
    for network in config.networks.iter().filter(|n| n.has_output_channels()) {
        let (sender, task) = sessions.spawn_output_session(network.clone());
        tasks.push(task);

        let mut route = OutputRoute {
            session: network.name.clone(),
            sender,
            pre_channels: Vec::new(),
            nuke_channels: Vec::new(),
            info_channels: Vec::new(),
        };
        for channel in &network.channels {
            for class in channel.subscriptions() {
                let list = match class {
                    OutputClass::Pre => &mut route.pre_channels,
                    OutputClass::Nuke => &mut route.nuke_channels,
                    OutputClass::Info => &mut route.info_channels,
                };
                list.push(channel.name.clone());
            }
        }
        info!(network = %network.name, "output session configured");
        routes.push(route);
    }
    let sink: Arc<dyn EventSink> = Arc::new(Broadcaster::new(routes));

    let classifier: Option<Arc<dyn ReleaseClassifier>> = match &config.relparse {
        Some(relparse) => {
            info!("Release classifier: {}", relparse.command);
            Some(Arc::new(CommandClassifier::new(relparse.clone())))
        }
        None => {
            info!("No release classifier configured; sections default to PRE");
            None
        }
    };

    let releases = Arc::new(ReleaseStore::new(conn.clone(), sink.clone(), classifier));
    let nukes = Arc::new(NukeLedger::new(
        conn,
        sink,
        config.store.flagged_network.clone(),
    ));
    let enricher = Arc::new(
        MetadataEnricher::from_config(&config.enricher)
            .context("Failed to build genre enricher")?,
    );

    let pipeline: Arc<dyn LineHandler> = Arc::new(
        IngestPipeline::new(Arc::clone(&releases), nukes, enricher, &config.networks)
            .context("Failed to compile channel grammars")?,
    );

    if let Some(backfill) = config.backfill.clone() {
        info!("Backfill feed: {}", backfill.feed_url);
        let worker = prewire_core::SrrdbBackfill::new(backfill, Arc::clone(&releases))
            .context("Failed to build backfill worker")?;
        let shutdown_rx = sessions.subscribe_shutdown();
        tasks.push(tokio::spawn(async move {
            worker.run(shutdown_rx).await;
        }));
    }

    for network in config.networks.iter().filter(|n| n.has_input_channels()) {
        info!(network = %network.name, "input session configured");
        tasks.push(sessions.spawn_input_session(network.clone(), Arc::clone(&pipeline)));
    }

    shutdown_signal().await;
    info!("Shutting down...");
    sessions.shutdown();
    for task in tasks {
        let _ = task.await;
    }
    info!("All sessions stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
