use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kvm_coordinator::config::AppConfig;
use kvm_coordinator::coordinator::Coordinator;
use kvm_coordinator::desktop::{Desktop, HeadlessDesktop};
use kvm_coordinator::state::AppState;
use kvm_coordinator::web;

/// Log level for the application (§10.1, §10.4).
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// kvm-coordinator command line arguments (§10.3, §10.4).
#[derive(Parser, Debug)]
#[command(name = "kvm-coordinator")]
#[command(version, about = "Session, capture and signalling coordinator for a headless WebRTC remote desktop", long_about = None)]
struct CliArgs {
    /// Path to a TOML configuration file (missing file falls back to defaults)
    #[arg(short = 'c', long, value_name = "PATH", default_value = "./config.toml")]
    config: PathBuf,

    /// Listen address (overrides config file)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides config file)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level
    #[arg(short = 'l', long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.log_level.as_filter()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = AppConfig::load(Some(&args.config))?;
    if let Some(address) = args.address {
        config.server.bind_address = address;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let config = Arc::new(config);

    let desktop: Arc<dyn Desktop> = HeadlessDesktop::new();
    let coordinator = Coordinator::new(config.clone(), desktop);
    let state = AppState::new(config.clone(), coordinator.clone());

    let app = web::router(state).into_make_service_with_connect_info::<SocketAddr>();

    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "kvm-coordinator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    coordinator.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
