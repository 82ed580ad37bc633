use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Context, Result};
use owo_colors::OwoColorize;
use tracing::{info, warn};

use manda_core::Connector;
use manda_db::MandaDb;
use manda_ipc::IpcConnector;
use manda_server::{AppState, Config, JwtManager, build_router};
use manda_worker::MandaWorker;

fn print_banner() {
    let banner = r#"
  __  __                _
 |  \/  | __ _ _ __   __| | __ _
 | |\/| |/ _` | '_ \ / _` |/ _` |
 | |  | | (_| | | | | (_| | (_| |
 |_|  |_|\__,_|_| |_|\__,_|\__,_|

    Messaging Instance Server
"#;
    println!("{}", banner.bright_green());
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let config = Config::parse();
    print_banner();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .from_env_lossy()
                .add_directive("manda_server=info".parse()?)
                .add_directive("manda_worker=info".parse()?)
                .add_directive("manda_ipc=info".parse()?)
                .add_directive("manda_db=info".parse()?),
        )
        .init();

    let db = match &config.db_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            MandaDb::new_with_path(&path.display().to_string()).await
        }
        None => MandaDb::new().await,
    }
    .wrap_err("Failed to open database")?;
    let db = Arc::new(db);

    let bridge_dir = config.resolve_bridge_dir()?;
    info!(bridge_dir = %bridge_dir.display(), "Starting protocol bridge");
    let connector = Arc::new(
        IpcConnector::start(bridge_dir, config.request_timeout())
            .await
            .wrap_err("Failed to start protocol bridge")?,
    );

    let worker = Arc::new(MandaWorker::new(
        Arc::clone(&db),
        Arc::clone(&connector) as Arc<dyn Connector>,
        config.reconnect_policy(),
    ));

    if config.restore {
        match worker.restore_sessions().await {
            Ok(restored) => info!(restored, "Restored sessions"),
            Err(e) => warn!(error = %e, "Failed to restore sessions"),
        }
    }

    let state = AppState {
        worker: Arc::clone(&worker),
        jwt: JwtManager::new(config.jwt_secret.as_bytes()),
        token_ttl_secs: config.jwt_ttl_secs,
    };

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .wrap_err_with(|| format!("Failed to bind {}", config.addr))?;
    info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("Server error")?;

    info!("Shutting down");
    worker.shutdown().await;
    if let Err(e) = connector.stop().await {
        warn!(error = %e, "Failed to stop protocol bridge");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
