// src/server/main.rs
// Entry point for the movier server
use movier::server::{config::ServerConfig, database::Database, connection::Server};
use movier::server::{auth, feed::ChangeFeed, redis_relay, websocket::ListenerServer};
use movier::utils::performance;
use std::sync::Arc;
use log::{info, warn, error};

const SESSION_CLEANUP_SECS: u64 = 60 * 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str())).init();

    let ws_port = config
        .websocket_port()
        .ok_or_else(|| anyhow::anyhow!("SERVER_PORT {} leaves no port for the listener server", config.port))?;

    if config.enable_tls {
        info!("TLS is enabled; set TLS_CERT_PATH and TLS_KEY_PATH to the cert and key PEM files.");
    } else {
        info!("TLS is disabled; connections will be plain TCP.");
    }

    let database = Arc::new(Database::connect(&config.database_url).await?);
    info!("Running database migrations...");
    database.migrate().await.map_err(|e| {
        error!("Database migration failed: {}", e);
        e
    })?;
    info!("Database migrations completed");

    let feed = ChangeFeed::default();
    if let Some(redis_url) = &config.redis_url {
        if let Err(e) = redis_relay::start(redis_url, feed.clone()).await {
            warn!("Redis relay unavailable ({}); changes stay local to this instance", e);
        }
    }

    // Performance logger in background
    let perf_db = database.clone();
    let perf_log_path = config.performance_log_path.clone();
    tokio::spawn(async move {
        info!("Starting performance logger, writing every 120 seconds to: {}", perf_log_path);
        performance::start_performance_logger(perf_db, &perf_log_path).await;
    });

    // Expired sessions and reset tokens
    let cleanup_db = database.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(SESSION_CLEANUP_SECS));
        loop {
            interval.tick().await;
            auth::cleanup_expired_sessions(cleanup_db.clone()).await;
        }
    });

    let ws_addr = format!("{}:{}", config.host, ws_port);
    let listeners = ListenerServer::new(database.clone(), feed.clone());
    tokio::spawn(async move {
        if let Err(e) = listeners.run(&ws_addr).await {
            error!("WebSocket server error: {}", e);
        }
    });

    let addr = format!("{}:{}", config.host, config.port);
    let server = Server::new(database, config, feed);
    server.run(&addr).await?;
    Ok(())
}
