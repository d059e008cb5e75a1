use chrono::Utc;
use sysinfo::System;
use std::{fs::OpenOptions, io::Write, sync::Arc, time::Duration};
use tokio::time;
use crate::server::database::{Database, now_millis};
use log::{info, error, warn};

const LOG_INTERVAL_SECS: u64 = 120;

/// Row counts sampled from the store. A count that could not be read is -1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub users: i64,
    pub active_sessions: i64,
    pub groups: i64,
    pub messages: i64,
    pub watchlist_entries: i64,
}

async fn count(db: &Database, what: &str, sql: &str) -> i64 {
    match sqlx::query_scalar::<_, i64>(sql).fetch_one(&db.pool).await {
        Ok(n) => n,
        Err(e) => {
            warn!("Failed to query {}: {}", what, e);
            -1
        }
    }
}

pub async fn collect_stats(db: &Database) -> StoreStats {
    let active_sessions = match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sessions WHERE expires_at > ?")
        .bind(now_millis())
        .fetch_one(&db.pool)
        .await
    {
        Ok(n) => n,
        Err(e) => {
            warn!("Failed to query active sessions: {}", e);
            -1
        }
    };
    StoreStats {
        users: count(db, "users", "SELECT COUNT(*) FROM users").await,
        active_sessions,
        groups: count(db, "groups", "SELECT COUNT(*) FROM groups").await,
        messages: count(db, "messages", "SELECT COUNT(*) FROM messages").await,
        watchlist_entries: count(db, "watchlist", "SELECT COUNT(*) FROM watchlist").await,
    }
}

pub async fn start_performance_logger(db: Arc<Database>, log_path: &str) {
    let mut system = System::new_all();

    if let Some(parent) = std::path::Path::new(log_path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Could not create performance log directory {:?}: {}", parent, e);
            }
        }
    }

    let mut file = match OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path) {
        Ok(f) => f,
        Err(e) => {
            error!("Unable to open performance log file '{}': {}", log_path, e);
            return;
        }
    };

    // Write header if file is empty
    if file.metadata().map(|m| m.len()).unwrap_or(0) == 0 {
        if let Err(e) = writeln!(file, "# movier server performance log\n# Timestamp, Users, Active_Sessions, Groups, Messages, Watchlist_Entries, CPU_Usage") {
            error!("Failed to write header to performance log: {}", e);
            return;
        }
        info!("Performance log initialized: {}", log_path);
    }

    loop {
        system.refresh_all();
        let cpus = system.cpus();
        let cpu_usage = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
        };
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let stats = collect_stats(&db).await;

        info!("[PERF] Users: {}, Sessions: {}, Groups: {}, Messages: {}, Watchlist: {}, CPU: {:.1}%",
            stats.users, stats.active_sessions, stats.groups, stats.messages, stats.watchlist_entries, cpu_usage);

        if let Err(e) = writeln!(file, "{}, {}, {}, {}, {}, {}, {:.1}%", timestamp,
            stats.users, stats.active_sessions, stats.groups, stats.messages, stats.watchlist_entries, cpu_usage) {
            error!("Failed to write to performance log: {}", e);
        } else if let Err(e) = file.flush() {
            error!("Failed to flush performance log: {}", e);
        }

        time::sleep(Duration::from_secs(LOG_INTERVAL_SECS)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{auth, config::ServerConfig, groups};

    #[tokio::test]
    async fn stats_count_store_rows() {
        let db = Database::connect_in_memory().await.unwrap();
        let db = Arc::new(db);
        let s = auth::sign_up(db.clone(), "a@b.io", "secret1", "A", &ServerConfig::default()).await.unwrap();
        groups::create_group(db.clone(), &s.user_id, "G").await.unwrap();

        let stats = collect_stats(&db).await;
        assert_eq!(stats, StoreStats { users: 1, active_sessions: 1, groups: 1, messages: 0, watchlist_entries: 0 });
    }
}
