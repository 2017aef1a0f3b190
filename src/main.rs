use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use meshping::cli::{parse_formats, Cli, Command};
use meshping::config::{self, ClientConfig, ServerConfig};
use meshping::export::ExportManager;
use meshping::path::{spawn_announcer, PathSession};
use meshping::position::{
    NoPositionProvider, PositionProvider, SyntheticTrackProvider, TermuxLocationProvider,
};
use meshping::probe::{ProbeConfig, ProbeEngine};
use meshping::server::ServerResponder;
use meshping::state::{MeasurementLog, StatsAggregator};
use meshping::transport::memory::MemoryHub;
use meshping::transport::udp::UdpTransport;
use meshping::transport::{Identity, SignalMetrics, Transport};

const GPS_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, finishing up...");
            ctrl_c_cancel.cancel();
        }
    });

    match cli.command {
        Command::Client {
            base_station,
            config,
            identity,
            export_dir,
            export,
            count,
            no_gps,
            listen,
            peer,
        } => {
            run_client(
                base_station,
                &config,
                &identity,
                &export_dir,
                &export,
                count,
                no_gps,
                listen,
                peer,
                cancel,
            )
            .await
        }
        Command::Server {
            config,
            identity,
            listen,
            peer,
        } => run_server(&config, &identity, listen, peer, cancel).await,
        Command::Selftest { count, export_dir } => run_selftest(count, &export_dir, cancel).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_client(
    base_station: Option<String>,
    config_path: &Path,
    identity_path: &Path,
    export_dir: &Path,
    export: &[String],
    count: Option<u64>,
    no_gps: bool,
    listen: SocketAddr,
    peers: Vec<SocketAddr>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut config: ClientConfig = config::load_or_create(config_path)?;
    if let Some(hash) = base_station {
        config.base_station_hash = hash;
    }
    config.validate()?;
    let destination = config.base_station()?;
    let formats = parse_formats(export)?;

    let identity = Identity::load_or_create(identity_path)?;
    println!("Client identity {}", identity);

    let transport: Arc<dyn Transport> =
        Arc::new(UdpTransport::bind(identity, listen, peers).await?);
    let path = Arc::new(PathSession::new(Arc::clone(&transport), destination));
    let announcer = spawn_announcer(
        Arc::clone(&transport),
        config.display_name.clone(),
        config.announce_interval(),
        cancel.clone(),
    );

    println!(
        "Establishing path to {} (up to {:.0}s)...",
        destination.short(),
        config.path_establishment_wait
    );
    path.establish(config.path_establishment_wait()).await?;
    println!("✓ Path established");

    let position: Arc<dyn PositionProvider> = if no_gps {
        println!("GPS disabled, results will not be mapped");
        Arc::new(NoPositionProvider)
    } else {
        Arc::new(TermuxLocationProvider::new(GPS_LOOKUP_TIMEOUT))
    };

    let log = Arc::new(MeasurementLog::with_raw_log(Path::new(&config.log_file))?);
    let stats = Arc::new(StatsAggregator::new());
    let exports = ExportManager::new(export_dir, &formats)?;
    println!(
        "Exporting {} to {}",
        formats
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(", "),
        export_dir.display()
    );

    let engine = ProbeEngine::new(
        transport,
        path,
        position,
        log,
        stats,
        exports,
        ProbeConfig {
            ping_interval: config.ping_interval(),
            ping_delay: config.ping_delay(),
            ping_timeout: config.ping_timeout(),
            pre_first_ping_delay: config.pre_ping_delay(),
            count,
        },
        config.path_establishment_wait(),
        cancel,
    );
    let result = engine.run().await;
    announcer.abort();
    result
}

async fn run_server(
    config_path: &Path,
    identity_path: &Path,
    listen: SocketAddr,
    peers: Vec<SocketAddr>,
    cancel: CancellationToken,
) -> Result<()> {
    let config: ServerConfig = config::load_or_create(config_path)?;
    let identity = Identity::load_or_create(identity_path)?;
    println!("Server identity {}", identity);
    println!("Share this hash with clients: {}", identity.to_hex());

    let transport: Arc<dyn Transport> =
        Arc::new(UdpTransport::bind(identity, listen, peers).await?);
    let announcer = spawn_announcer(
        Arc::clone(&transport),
        config.display_name.clone(),
        config.announce_interval(),
        cancel.clone(),
    );

    let responder = ServerResponder::new(Arc::clone(&transport), config.reply_path_wait())
        .with_log_file(Path::new(&config.log_file))?;
    responder.run(cancel).await;
    announcer.abort();
    Ok(())
}

/// Exercise the whole pipeline in-process over a simulated radio link.
async fn run_selftest(count: u64, export_dir: &Path, cancel: CancellationToken) -> Result<()> {
    println!("Self test: {} pings over a simulated link", count);
    let hub = MemoryHub::new(
        Duration::from_millis(20),
        SignalMetrics {
            rssi_dbm: Some(-90),
            snr_db: Some(7.5),
        },
    );
    let server_transport: Arc<dyn Transport> = Arc::new(hub.register(Identity::generate()));
    let client_transport: Arc<dyn Transport> = Arc::new(hub.register(Identity::generate()));
    let server_id = server_transport.local_identity();

    let responder = ServerResponder::new(server_transport, Duration::from_secs(1));
    let server_cancel = cancel.clone();
    let server = tokio::spawn(responder.run(server_cancel));

    let path = Arc::new(PathSession::new(Arc::clone(&client_transport), server_id));
    path.establish(Duration::from_secs(1)).await?;

    let log = Arc::new(MeasurementLog::new());
    let stats = Arc::new(StatsAggregator::new());
    let exports = ExportManager::new(export_dir, &meshping::export::ExportFormat::ALL)?;
    let engine = ProbeEngine::new(
        client_transport,
        path,
        Arc::new(SyntheticTrackProvider::new((45.0, -122.0), 0.0005)),
        log,
        stats,
        exports,
        ProbeConfig {
            ping_interval: Duration::from_millis(200),
            ping_timeout: Duration::from_secs(2),
            pre_first_ping_delay: Duration::ZERO,
            count: Some(count),
            ..ProbeConfig::default()
        },
        Duration::from_secs(1),
        cancel.clone(),
    );
    engine
        .run()
        .await
        .context("self test probe loop failed")?;

    cancel.cancel();
    server.await.ok();
    println!("Self test documents written to {}", export_dir.display());
    Ok(())
}
