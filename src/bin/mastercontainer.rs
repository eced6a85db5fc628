use aio_master::docker::engine::DockerEngine;
use aio_master::server::config::ServerConfig;
use aio_master::server::core_services::CoreServices;
use aio_master::version::VERSION;
use aio_master::web::create_axum_router;

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "mastercontainer.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    // Default to `info` if RUST_LOG is not set.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bollard=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let server_config = Arc::new(ServerConfig::load(args.config.as_deref())?);
    init_logging(&server_config.log_dir);
    info!("Starting master container, version: {}", VERSION);

    let engine = match DockerEngine::connect().await {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!(error = %e, "Cannot reach the container engine");
            return Err(e.into());
        }
    };

    let core = Arc::new(CoreServices::new(server_config.clone(), engine)?);
    core.boot().await?;

    let listener = tokio::net::TcpListener::bind(server_config.listen_addr).await?;
    info!(addr = %server_config.listen_addr, "HTTP server listening");
    axum::serve(listener, create_axum_router(core))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Master container stopped");
    Ok(())
}
