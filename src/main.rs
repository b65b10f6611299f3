// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - ASM Service Entry Point
 * `launch` binds the HTTP surface and the broker consumer;
 * SIGINT/SIGTERM drain the connection pools before exit.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use asmm8::config::{AppConfig, DEFAULT_CONFIG_PATH};
use asmm8::service::Service;
use asmm8::utils::is_valid_ip_address;

/// ASM subdomain enumeration service
#[derive(Parser)]
#[command(name = "asmm8")]
#[command(author = "Bountyy Oy <info@bountyy.fi>")]
#[command(version)]
#[command(about = "Subdomain enumeration stage of the ASM pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the ASM API service on the given address
    Launch {
        /// IP address to bind. Listens on all interfaces by default.
        #[arg(long, default_value = "0.0.0.0")]
        ip: String,

        /// Port to bind, restricted to the service range 8000-9000
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
    /// Print the build identifier
    Version,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Version => {
            println!("asmm8 {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Launch { ip, port } => {
            if !is_valid_ip_address(&ip) {
                bail!("invalid IP address `{}`", ip);
            }
            if !(8000..=9000).contains(&port) {
                bail!("port must be between 8000 and 9000");
            }

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(num_cpus::get())
                .thread_name("asmm8-worker")
                .enable_all()
                .build()
                .context("failed to build the async runtime")?;

            runtime.block_on(serve(ip, port))
        }
    }
}

async fn serve(ip: String, port: u16) -> Result<()> {
    let config = AppConfig::load(DEFAULT_CONFIG_PATH)?;
    let service = Service::bootstrap(config).await?;

    let address = format!("{}:{}", ip, port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;
    info!(address = %address, "[SUCCESS] API service starting");

    service.activate_consumer_when_ready();

    let router = service.router();
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    service.shutdown().await;
    info!("API service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install SIGINT handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
