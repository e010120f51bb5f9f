use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use realsense_monitor::config::ConfigStore;
use realsense_monitor::device::{create_backend, BackendType};
use realsense_monitor::state::AppState;
use realsense_monitor::web;
use realsense_monitor::webrtc::WebRtcNegotiator;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// realsense-monitor command line arguments
#[derive(Parser, Debug)]
#[command(name = "realsense-monitor")]
#[command(version, about = "Depth camera control and WebRTC streaming server", long_about = None)]
struct CliArgs {
    /// Configuration file (created with defaults if missing)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address (overrides config file)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides config file)
    #[arg(short = 'p', long, value_name = "PORT")]
    http_port: Option<u16>,

    /// Camera backend (overrides config file)
    #[arg(short = 'b', long, value_name = "BACKEND")]
    backend: Option<BackendType>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting realsense-monitor v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.unwrap_or_else(default_config_path);
    tracing::info!("Configuration file: {}", config_path.display());
    let config_store = ConfigStore::new(&config_path).await?;

    // CLI overrides are applied for this run only
    let mut config = (*config_store.get()).clone();
    if let Some(addr) = args.address {
        config.web.bind_address = addr;
    }
    if let Some(port) = args.http_port {
        config.web.http_port = port;
    }
    if let Some(backend) = args.backend {
        config.hardware.backend = backend;
    }
    config.validate()?;
    let config_store = ConfigStore::in_memory(config.clone());

    let backend = create_backend(config.hardware.backend, config.hardware.synthetic_devices);
    tracing::info!("Camera backend: {}", backend.name());

    let negotiator = Arc::new(WebRtcNegotiator::new(
        realsense_monitor::webrtc::WebRtcConfig::from_settings(&config.webrtc),
    ));
    let state = AppState::new(config_store, backend, negotiator);

    match state.registry.discover().await {
        Ok(devices) => tracing::info!("Found {} device(s)", devices.len()),
        Err(e) => tracing::warn!("Initial device discovery failed: {}", e),
    }

    state.spawn_background_tasks();

    let ip: IpAddr = config
        .web
        .bind_address
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid bind address: {}", config.web.bind_address))?;
    let addr = SocketAddr::new(ip, config.web.http_port);

    let app = web::create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting HTTP server on http://{}", addr);

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    };

    tokio::select! {
        _ = shutdown_signal => {}
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
        }
    }

    state.shutdown().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "realsense_monitor=error,tower_http=error",
        LogLevel::Warn => "realsense_monitor=warn,tower_http=warn",
        LogLevel::Info => "realsense_monitor=info,tower_http=info",
        LogLevel::Verbose => "realsense_monitor=debug,tower_http=info",
        LogLevel::Debug => "realsense_monitor=debug,tower_http=debug",
        LogLevel::Trace => "realsense_monitor=trace,tower_http=debug",
    };

    // RUST_LOG takes priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Default configuration file location
fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("REALSENSE_MONITOR_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("/etc/realsense-monitor/config.json")
}
