use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::filter::EnvFilter;
use worksync_core::{
    Config, ConnectivityMonitor, HttpRemote, OfflineService, QueueStore, StatusBus, StatusEvent,
};

use worksync_syncd::discovery::DiscoveryController;
use worksync_syncd::peer::PeerTransport;
use worksync_syncd::probe::ConnectivityProbe;

#[derive(Parser)]
#[command(name = "worksync-syncd", about = "Background sync daemon for worksync")]
struct Args {
    /// Path to daemon configuration file
    #[arg(long, default_value = "~/.config/worksync/config.toml")]
    config: String,

    /// Run in foreground mode (don't daemonize)
    #[arg(long)]
    foreground: bool,

    /// Peer WebSocket URL to sync with at startup, e.g. ws://192.168.1.20:9461
    #[arg(long)]
    peer: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    // Expand config path
    let config_path = if args.config.starts_with("~/") {
        dirs::home_dir()
            .context("Could not determine home directory")?
            .join(&args.config[2..])
    } else {
        PathBuf::from(args.config)
    };

    let config = Config::load_or_create(&config_path)?;
    info!(config = %config_path.display(), "worksync-syncd starting");

    let db_path = config.get_database_path()?;
    let store = Arc::new(QueueStore::open(&db_path).with_context(|| {
        format!("Failed to open queue database at {}", db_path.display())
    })?);

    // Startup maintenance: expired cache rows out, old confirmed rows out.
    let swept = store.cache_sweep_expired()?;
    let cutoff =
        chrono::Utc::now() - chrono::Duration::days(config.storage.retain_synced_days as i64);
    let pruned = store.prune_synced(cutoff)?;
    if swept > 0 || pruned > 0 {
        info!(swept, pruned, "startup maintenance finished");
    }

    let bus = Arc::new(StatusBus::new());
    let monitor = Arc::new(ConnectivityMonitor::new(bus.clone(), false));
    let remote = Arc::new(HttpRemote::new(config.remote.base_url.clone()));
    let service = Arc::new(OfflineService::new(
        store,
        remote,
        monitor.clone(),
        bus.clone(),
        config.default_cache_ttl(),
    ));

    // Subscribe before the probe starts so its first report is not missed.
    let mut status = service.subscribe_status();

    let probe = ConnectivityProbe::new(
        monitor,
        config.probe_url().to_string(),
        config.probe_interval(),
    );
    let probe_task = tokio::spawn(probe.run());

    let transport = Arc::new(PeerTransport::new(
        service.clone(),
        bus.clone(),
        config.device_name(),
        config.peer.max_chunk_bytes,
    ));
    transport.clone().listen(&config.peer.listen_addr).await?;

    if let Some(ref url) = args.peer {
        if let Err(err) = transport.clone().connect(url).await {
            warn!(error = %err, "could not reach peer at startup");
        }
    }

    let discovery = Arc::new(DiscoveryController::new(
        service.clone(),
        transport.clone(),
        bus,
        config.discovery_interval(),
    ));
    discovery.start();

    if !args.foreground {
        info!("worksync-syncd daemon started");
        // TODO: Daemonize process (platform-specific)
    }

    // Main event loop
    loop {
        tokio::select! {
            event = status.recv() => {
                match event {
                    Some(StatusEvent::Online) => {
                        match service.sync_now().await {
                            Ok(report) if report.synced > 0 || report.errors > 0 => {
                                info!(
                                    synced = report.synced,
                                    errors = report.errors,
                                    "connectivity sync finished"
                                );
                            }
                            Ok(_) => {}
                            Err(err) => warn!(error = %err, "connectivity sync failed"),
                        }
                    }
                    Some(StatusEvent::NearbyDataPending { pending }) => {
                        info!(pending, "operations waiting; connect a peer to share them");
                    }
                    Some(_) => {}
                    None => break,
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal, stopping worksync-syncd");
                break;
            }
        }
    }

    discovery.stop();
    transport.shutdown();
    probe_task.abort();

    Ok(())
}
