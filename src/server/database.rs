use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use log::info;

#[derive(Debug, Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        info!("[DB] Connecting to {}", database_url);

        // Create the parent directory of a file-backed database
        let file_path = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(database_url);
        let file_path = file_path.split('?').next().unwrap_or(file_path);

        if !file_path.starts_with(':') {
            if let Some(parent) = std::path::Path::new(file_path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(|e| sqlx::Error::Configuration(Box::new(e)))?;
                    info!("[DB] Created directory {:?}", parent);
                }
            }
        }

        let url = if database_url.contains('?') || file_path.starts_with(':') {
            database_url.to_string()
        } else {
            format!("{}?mode=rwc", database_url)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        info!("[DB] Connection pool ready");
        Ok(Self { pool })
    }

    /// Single-connection in-memory store; every connection to `:memory:` is a separate database.
    pub async fn connect_in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        // Profiles (one per auth user)
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                display_name TEXT NOT NULL,
                photo_url TEXT,
                created_at INTEGER NOT NULL
            );
        "#).execute(&self.pool).await?;

        // Auth
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS auth (
                user_id TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL
            );
        "#).execute(&self.pool).await?;

        // Sessions
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
        "#).execute(&self.pool).await?;

        // Password resets
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS password_resets (
                reset_token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );
        "#).execute(&self.pool).await?;

        // Groups
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS groups (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_by TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
        "#).execute(&self.pool).await?;

        // Group member list (source of truth)
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS group_members (
                group_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                added_at INTEGER NOT NULL,
                PRIMARY KEY (group_id, user_id)
            );
        "#).execute(&self.pool).await?;

        // Per-user mirror of joined groups
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS user_groups (
                user_id TEXT NOT NULL,
                group_id TEXT NOT NULL,
                name TEXT NOT NULL,
                joined_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, group_id)
            );
        "#).execute(&self.pool).await?;

        // Group messages
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                sender_name TEXT NOT NULL,
                kind TEXT NOT NULL,
                body TEXT NOT NULL,
                sent_at INTEGER NOT NULL
            );
        "#).execute(&self.pool).await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_group_sent ON messages (group_id, sent_at);")
            .execute(&self.pool).await?;

        // Watchlist entries, keyed by the composite id
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS watchlist (
                user_id TEXT NOT NULL,
                entry_id TEXT NOT NULL,
                media_id INTEGER NOT NULL,
                media_type TEXT NOT NULL,
                title TEXT NOT NULL,
                status TEXT NOT NULL,
                rating INTEGER,
                poster_path TEXT,
                watch_listed_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, entry_id)
            );
        "#).execute(&self.pool).await?;

        Ok(())
    }
}

/// Store timestamps are milliseconds since the epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
