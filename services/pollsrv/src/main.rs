//! Polling engine entry point
//!
//! Loads configuration, initialises tracing with console and daily rolling
//! file output, wires the orchestrator over the in-memory store, serves the
//! management API and runs until a shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use pollsrv::api::api_router;
use pollsrv::config::Config;
use pollsrv::module::MODULE_NAME;
use pollsrv::store::MemoryStore;
use pollsrv::{wait_for_shutdown, ModbusModule};

/// Command line arguments for the polling engine.
#[derive(Parser)]
#[command(
    name = "pollsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Modbus polling engine",
    long_about = "Per-network Modbus polling engine with priority scheduling over RTU and TCP transports"
)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/pollsrv.yaml")]
    config: String,

    /// Log directory path
    #[arg(long, default_value = "logs")]
    log_dir: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;

    // Console plus daily-rotated file output
    std::fs::create_dir_all(&args.log_dir).unwrap_or_else(|e| {
        eprintln!("Failed to create log directory {}: {e}", args.log_dir);
    });
    let file_appender = tracing_appender::rolling::daily(&args.log_dir, "pollsrv.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::fmt::writer::MakeWriterExt;
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout.and(non_blocking))
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                config
                    .log_level
                    .parse()
                    .unwrap_or_else(|_| tracing::Level::ERROR.into()),
            ),
        )
        .init();

    info!("Starting polling engine v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {}", args.config);

    // A real deployment plugs the platform store in here; the in-memory
    // store keeps the engine self-contained.
    let (store, plugin) = MemoryStore::with_plugin(MODULE_NAME);
    info!("Registered plugin {} ({})", plugin.name, plugin.uuid);

    let module = Arc::new(ModbusModule::new(config.clone(), Arc::new(store)).await?);
    if let Err(e) = module.enable().await {
        error!("Failed to enable polling: {e}");
        return Err(e.into());
    }

    let server_handle = if config.api.enabled {
        let addr: SocketAddr = format!("{}:{}", config.api.host, config.api.port).parse()?;
        let app = api_router(Arc::clone(&module));
        info!("Management API listening on http://{addr}");
        let listener = tokio::net::TcpListener::bind(addr).await?;
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("API server error: {e}");
            }
        }))
    } else {
        info!("API server disabled in configuration");
        None
    };

    info!("Startup complete");
    wait_for_shutdown().await;
    info!("Received shutdown signal, stopping");

    module.disable().await;
    if let Some(handle) = server_handle {
        handle.abort();
        let _ = handle.await;
    }
    info!("Shutdown complete");

    Ok(())
}
