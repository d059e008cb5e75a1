use std::env;
use log::warn;

/// Used when `INVITE_SECRET` is unset so that every instance still agrees on one key.
pub const DEFAULT_INVITE_SECRET: &str = "movier-shared-invite-secret";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub enable_tls: bool,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    pub log_level: String,
    pub session_expiry_days: u32,
    pub reset_token_ttl_minutes: u32,
    pub max_message_length: usize,
    pub invite_secret: String,
    pub redis_url: Option<String>,
    pub performance_log_path: String,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let invite_secret = match env::var("INVITE_SECRET") {
            Ok(s) if !s.trim().is_empty() => s,
            _ => {
                warn!("[CONFIG] INVITE_SECRET not set, falling back to the built-in shared secret");
                DEFAULT_INVITE_SECRET.to_string()
            }
        };

        Self {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(5000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:data/movier.db".to_string()),
            enable_tls: env::var("ENABLE_TLS").map(|v| v == "true" || v == "1").unwrap_or(false),
            tls_cert_path: env::var("TLS_CERT_PATH").ok(),
            tls_key_path: env::var("TLS_KEY_PATH").ok(),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            session_expiry_days: env::var("SESSION_EXPIRY_DAYS").ok().and_then(|v| v.parse().ok()).unwrap_or(30),
            reset_token_ttl_minutes: env::var("RESET_TOKEN_TTL_MINUTES").ok().and_then(|v| v.parse().ok()).unwrap_or(60),
            max_message_length: env::var("MAX_MESSAGE_LENGTH").ok().and_then(|v| v.parse().ok()).unwrap_or(2048),
            invite_secret,
            redis_url: env::var("REDIS_URL").ok().filter(|u| !u.trim().is_empty()),
            performance_log_path: env::var("PERFORMANCE_LOG_PATH").unwrap_or_else(|_| "data/movier_performance.log".to_string()),
        }
    }

    /// The listener (WebSocket) port sits right after the line-protocol port.
    /// `None` when the line-protocol port is the last one.
    pub fn websocket_port(&self) -> Option<u16> {
        self.port.checked_add(1)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            database_url: "sqlite::memory:".to_string(),
            enable_tls: false,
            tls_cert_path: None,
            tls_key_path: None,
            log_level: "info".to_string(),
            session_expiry_days: 30,
            reset_token_ttl_minutes: 60,
            max_message_length: 2048,
            invite_secret: DEFAULT_INVITE_SECRET.to_string(),
            redis_url: None,
            performance_log_path: "data/movier_performance.log".to_string(),
        }
    }
}

fn listener_port_after(port: u16) -> u16 {
    port.checked_add(1).unwrap_or_else(|| {
        warn!("[CONFIG] CLIENT_PORT {} has no following port, set WEBSOCKET_PORT; using {}", port, DEFAULT_LISTENER_PORT);
        DEFAULT_LISTENER_PORT
    })
}

const DEFAULT_LISTENER_PORT: u16 = 5001;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub default_host: String,
    pub default_port: u16,
    pub websocket_host: String,
    pub websocket_port: u16,
    pub tmdb_api_key: Option<String>,
    pub tmdb_base_url: String,
    pub watch_region: String,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let default_port: u16 = env::var("CLIENT_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(5000);
        Self {
            default_host: env::var("CLIENT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            default_port,
            websocket_host: env::var("WEBSOCKET_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            websocket_port: env::var("WEBSOCKET_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or_else(|| listener_port_after(default_port)),
            tmdb_api_key: env::var("TMDB_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            tmdb_base_url: env::var("TMDB_BASE_URL").unwrap_or_else(|_| "https://api.themoviedb.org/3".to_string()),
            watch_region: env::var("WATCH_REGION").unwrap_or_else(|_| "IN".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_port_follows_protocol_port() {
        let mut cfg = ServerConfig::default();
        assert_eq!(cfg.websocket_port(), Some(5001));
        cfg.port = u16::MAX;
        assert_eq!(cfg.websocket_port(), None);
    }

    #[test]
    fn client_listener_port_survives_last_port() {
        assert_eq!(listener_port_after(7000), 7001);
        assert_eq!(listener_port_after(u16::MAX), DEFAULT_LISTENER_PORT);
    }
}
