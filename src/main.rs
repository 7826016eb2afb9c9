// Auction server entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file)
// 2. Load config (optional path from argv)
// 3. Open database
// 4. Seed credentials, teams, and players on first run
// 5. Recover the auction lot from the store
// 6. Create channels and spawn the WebSocket server task
// 7. Spawn the application loop
// 8. Wait for Ctrl+C, then shut down

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

use gavelcast::app;
use gavelcast::auction::engine::AuctionEngine;
use gavelcast::config::Config;
use gavelcast::db::Database;
use gavelcast::seed;
use gavelcast::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("gavelcast starting up");

    // 2. Load config
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("failed to load configuration")?;
    info!(
        "config loaded: port={}, roster_limit={}, {} seed teams",
        config.server.port,
        config.auction.roster_limit,
        config.seed.teams.len()
    );

    // 3. Open database
    let db_path = config.db_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create data directory {}", parent.display()))?;
    }
    let db = Arc::new(Database::open(&db_path).context("failed to open database")?);
    info!("database opened at {}", db_path.display());

    // 4. First-run seeding
    seed::run(&db, &config).context("seeding failed")?;

    // 5. Recover the auction lot
    let engine = AuctionEngine::recover(db.clone(), config.auction.roster_limit)
        .context("failed to recover auction state")?;
    if engine.lot().is_open() {
        info!(
            "resumed an open lot (player {:?}, current bid {})",
            engine.lot().current_player,
            engine.lot().current_bid
        );
    } else {
        info!("no open lot to resume");
    }

    // 6. Channels and WebSocket server task
    let (engine_tx, engine_rx) = mpsc::channel(256);
    let (broadcast_tx, _) = broadcast::channel(256);

    let gateway = server::Gateway {
        db,
        engine_tx,
        broadcast_tx: broadcast_tx.clone(),
    };
    let port = config.server.port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run(port, gateway).await {
            error!("WebSocket server error: {e:#}");
        }
    });

    // 7. Application loop
    let app_handle = tokio::spawn(async move {
        if let Err(e) = app::run(engine, engine_rx, broadcast_tx).await {
            error!("application loop error: {e:#}");
        }
    });

    info!("auction server ready on 0.0.0.0:{port}");

    // 8. Shut down on Ctrl+C. Aborting the server drops the connection
    // tasks and with them every request sender, which ends the app loop.
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    server_handle.abort();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), app_handle).await;

    info!("gavelcast shut down cleanly");
    Ok(())
}

/// Initialize tracing to a log file so stdout stays clean for operators.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("gavelcast.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gavelcast=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
