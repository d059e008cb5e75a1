use crate::common::crypto::InviteCodec;
use crate::common::models::{MediaType, NewWatchlistEntry, WatchStatus, WatchlistKey};
use crate::server::config::ServerConfig;
use crate::server::database::Database;
use crate::server::error::{ServiceError, ServiceResult};
use crate::server::feed::{ChangeFeed, Topic};
use crate::server::{auth, groups, messages, users, watchlist};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use std::fs::File;
use std::io::BufReader as StdBufReader;
use log::{debug, info, warn, error};

// Optional TLS
use tokio_rustls::TlsAcceptor;
use rustls::{ServerConfig as RustlsConfig};
use rustls_pemfile::{certs, rsa_private_keys, pkcs8_private_keys};

pub const HELP: &str = "Commands: \
/signup <email> <password> <display name> | /login <email> <password> | /logout <token> | \
/reset_password <email> | /confirm_reset <reset token> <new password> | /validate_session <token> | \
/profile <token> [user id] | /update_name <token> <name> | /update_photo <token> [url] | \
/create_group <token> <name> | /join_group <token> <invite code> | /my_groups <token> | \
/group_info <token> <group id> | /invite_code <token> <group id> | /rename_group <token> <group id> <name> | \
/delete_group <token> <group id> | /leave_group <token> <group id> | \
/send <token> <group id> <text> | /share <token> <movie|series> <media id> <group id>... | \
/messages <token> <group id> [limit] | /watchlist <token> | \
/watchlist_add <token> <movie|series> <media id> <vote|-> <poster|-> <title> | \
/watchlist_toggle <token> <movie|series> <media id> <vote|-> <poster|-> <title> | \
/watchlist_get <token> <id> | /watchlist_status <token> <id> <status> | /watchlist_remove <token> <id> | \
/help | /quit";

#[derive(Clone)]
pub struct Server {
    pub db: Arc<Database>,
    pub config: ServerConfig,
    pub feed: ChangeFeed,
    pub codec: InviteCodec,
}

fn json<T: Serialize>(value: &T) -> ServiceResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn media_type(s: &str) -> ServiceResult<MediaType> {
    s.parse().map_err(ServiceError::InvalidInput)
}

fn media_id(s: &str) -> ServiceResult<i64> {
    s.parse().map_err(|_| ServiceError::InvalidInput(format!("'{}' is not a valid media id", s)))
}

fn watchlist_key(s: &str) -> ServiceResult<WatchlistKey> {
    s.parse().map_err(ServiceError::InvalidInput)
}

/// `-` stands for an absent optional argument.
fn optional(s: &str) -> Option<&str> {
    if s == "-" { None } else { Some(s) }
}

fn new_entry(kind: &str, id: &str, vote: &str, poster: &str, title: &[&str]) -> ServiceResult<NewWatchlistEntry> {
    let vote_average = match optional(vote) {
        Some(v) => Some(v.parse::<f64>().map_err(|_| ServiceError::InvalidInput(format!("'{}' is not a valid vote", v)))?),
        None => None,
    };
    Ok(NewWatchlistEntry {
        media_type: media_type(kind)?,
        media_id: media_id(id)?,
        title: title.join(" "),
        vote_average,
        poster_path: optional(poster).map(str::to_string),
    })
}

impl Server {
    pub fn new(db: Arc<Database>, config: ServerConfig, feed: ChangeFeed) -> Self {
        let codec = InviteCodec::new(&config.invite_secret);
        Self { db, config, feed, codec }
    }

    /// Configure TLS acceptor from the cert and key paths in the configuration
    fn setup_tls_acceptor(&self) -> anyhow::Result<Option<TlsAcceptor>> {
        if !self.config.enable_tls {
            info!("[TLS] TLS disabled in configuration");
            return Ok(None);
        }

        let cert_path = self.config.tls_cert_path.as_deref()
            .ok_or_else(|| anyhow::anyhow!("TLS_CERT_PATH environment variable not set"))?;
        let key_path = self.config.tls_key_path.as_deref()
            .ok_or_else(|| anyhow::anyhow!("TLS_KEY_PATH environment variable not set"))?;

        info!("[TLS] Loading certificate from: {}", cert_path);
        let cert_file = File::open(cert_path)
            .map_err(|e| anyhow::anyhow!("Failed to open certificate file '{}': {}", cert_path, e))?;
        let mut cert_reader = StdBufReader::new(cert_file);
        let cert_chain = certs(&mut cert_reader)?
            .into_iter()
            .map(rustls::Certificate)
            .collect::<Vec<_>>();
        if cert_chain.is_empty() {
            return Err(anyhow::anyhow!("No certificates found in {}", cert_path));
        }

        info!("[TLS] Loading private key from: {}", key_path);
        let key_file = File::open(key_path)
            .map_err(|e| anyhow::anyhow!("Failed to open private key file '{}': {}", key_path, e))?;
        let mut key_reader = StdBufReader::new(key_file);

        // Try PKCS8 first, then RSA
        let mut keys = pkcs8_private_keys(&mut key_reader)?;
        if keys.is_empty() {
            let mut key_reader = StdBufReader::new(File::open(key_path)?);
            keys = rsa_private_keys(&mut key_reader)?;
        }
        if keys.is_empty() {
            return Err(anyhow::anyhow!("No private keys found in {}", key_path));
        }

        let priv_key = rustls::PrivateKey(keys.remove(0));
        let rustls_cfg = RustlsConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(cert_chain, priv_key)
            .map_err(|e| anyhow::anyhow!("TLS configuration error: {}", e))?;

        Ok(Some(TlsAcceptor::from(Arc::new(rustls_cfg))))
    }

    pub async fn run(&self, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("[SERVER] Listening on {}", addr);

        let tls_acceptor = match self.setup_tls_acceptor() {
            Ok(acceptor) => acceptor,
            Err(e) => {
                warn!("[TLS] TLS configuration failed: {}; falling back to plain TCP", e);
                None
            }
        };

        loop {
            let (stream, peer) = listener.accept().await?;
            info!("[SERVER] New connection from {}", peer);
            let server = self.clone();
            let acceptor = tls_acceptor.clone();
            tokio::spawn(async move {
                let result = match acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => handle_client(server, tls_stream, peer).await,
                        Err(e) => {
                            warn!("[SERVER] TLS accept failed for {}: {}", peer, e);
                            return;
                        }
                    },
                    None => handle_client(server, stream, peer).await,
                };
                if let Err(e) = result {
                    warn!("[SERVER] Client error ({}): {}", peer, e);
                }
            });
        }
    }

    /// Runs one protocol command and renders the single-line `OK:` / `ERR:` response.
    pub async fn handle_command(&self, cmd: &str, args: &[&str]) -> String {
        info!("[SERVER] Received command: {} ({} args)", cmd, args.len());
        match self.dispatch(cmd, args).await {
            Ok(reply) => format!("OK: {}", reply),
            Err(e) => {
                if matches!(e, ServiceError::Database(_)) {
                    error!("[SERVER] {} failed: {}", cmd, e);
                }
                format!("ERR: {}", e)
            }
        }
    }

    async fn session(&self, token: &str) -> ServiceResult<String> {
        auth::validate_session(self.db.clone(), token).await
    }

    /// A new message changes the group's listing and every member's last-message preview.
    async fn notify_group(&self, group_id: &str) {
        self.feed.publish(Topic::GroupMessages(group_id.to_string()));
        match groups::get_group(self.db.clone(), group_id).await {
            Ok(group) => self.feed.publish_all(group.members.into_iter().map(Topic::UserGroups)),
            Err(e) => warn!("[FEED] Could not load members of {}: {}", group_id, e),
        }
    }

    async fn dispatch(&self, cmd: &str, args: &[&str]) -> ServiceResult<String> {
        let db = self.db.clone();
        match (cmd, args) {
            // AUTH
            ("/signup", [email, password, name @ ..]) if !name.is_empty() => {
                let s = auth::sign_up(db, email, password, &name.join(" "), &self.config).await?;
                Ok(format!("Registered as {} SESSION: {}", s.user_id, s.token))
            }
            ("/login", [email, password]) => {
                let s = auth::sign_in(db, email, password, &self.config).await?;
                Ok(format!("Logged in as {} SESSION: {}", s.user_id, s.token))
            }
            ("/logout", [token]) => {
                auth::sign_out(db, token).await?;
                Ok("Logged out".to_string())
            }
            ("/reset_password", [email]) => {
                let reset_token = auth::request_password_reset(db, email, &self.config).await?;
                // Operator copy for delivery; keep the value below info.
                debug!("[AUTH] Reset token for {}: {}", email, reset_token);
                Ok(format!("Password reset instructions sent to {}", email))
            }
            ("/confirm_reset", [reset_token, password]) => {
                auth::confirm_password_reset(db, reset_token, password).await?;
                Ok("Password updated, please log in again".to_string())
            }
            ("/validate_session", [token]) => self.session(token).await,

            // PROFILE
            ("/profile", [token]) => {
                let uid = self.session(token).await?;
                json(&users::get_profile(db, &uid).await?)
            }
            ("/profile", [token, user_id]) => {
                self.session(token).await?;
                json(&users::get_profile(db, user_id).await?)
            }
            ("/update_name", [token, name @ ..]) if !name.is_empty() => {
                let uid = self.session(token).await?;
                let rewritten = users::update_profile(db.clone(), &uid, Some(&name.join(" ")), None).await?;
                if rewritten > 0 {
                    for group_id in users::joined_group_ids(db, &uid).await? {
                        self.notify_group(&group_id).await;
                    }
                }
                Ok(format!("Name updated ({} messages rewritten)", rewritten))
            }
            ("/update_photo", [token, url @ ..]) if url.len() <= 1 => {
                let uid = self.session(token).await?;
                let url = url.first().copied().unwrap_or("");
                users::update_profile(db, &uid, None, Some(url)).await?;
                Ok("Photo updated".to_string())
            }

            // GROUPS
            ("/create_group", [token, name @ ..]) if !name.is_empty() => {
                let uid = self.session(token).await?;
                let group = groups::create_group(db, &uid, &name.join(" ")).await?;
                self.feed.publish(Topic::UserGroups(uid));
                json(&group)
            }
            ("/join_group", [token, code]) => {
                let uid = self.session(token).await?;
                let membership = groups::join_group(db, &self.codec, &uid, code).await?;
                self.feed.publish(Topic::UserGroups(uid));
                json(&membership)
            }
            ("/my_groups", [token]) => {
                let uid = self.session(token).await?;
                json(&groups::my_groups(db, &uid).await?)
            }
            ("/group_info", [token, group_id]) => {
                let uid = self.session(token).await?;
                json(&groups::group_info(db, &self.codec, &uid, group_id).await?)
            }
            ("/invite_code", [token, group_id]) => {
                let uid = self.session(token).await?;
                groups::invite_code(db, &self.codec, &uid, group_id).await
            }
            ("/rename_group", [token, group_id, name @ ..]) if !name.is_empty() => {
                let uid = self.session(token).await?;
                let touched = groups::rename_group(db, &uid, group_id, &name.join(" ")).await?;
                let count = touched.len();
                self.feed.publish_all(touched.into_iter().map(Topic::UserGroups));
                Ok(format!("Group renamed ({} members updated)", count))
            }
            ("/delete_group", [token, group_id]) => {
                let uid = self.session(token).await?;
                let former = groups::delete_group(db, &uid, group_id).await?;
                self.feed.publish(Topic::GroupMessages(group_id.to_string()));
                self.feed.publish_all(former.into_iter().map(Topic::UserGroups));
                Ok("Group deleted".to_string())
            }
            ("/leave_group", [token, group_id]) => {
                let uid = self.session(token).await?;
                groups::leave_group(db, &uid, group_id).await?;
                self.feed.publish(Topic::UserGroups(uid));
                Ok("Left group".to_string())
            }

            // MESSAGES
            ("/send", [token, group_id, text @ ..]) if !text.is_empty() => {
                let uid = self.session(token).await?;
                let msg = messages::send_message(db, &uid, group_id, &text.join(" "), &self.config).await?;
                self.notify_group(group_id).await;
                json(&msg)
            }
            ("/share", [token, kind, id, group_ids @ ..]) if !group_ids.is_empty() => {
                let uid = self.session(token).await?;
                let group_ids: Vec<String> = group_ids
                    .iter()
                    .flat_map(|g| g.split(','))
                    .filter(|g| !g.is_empty())
                    .map(str::to_string)
                    .collect();
                let sent = messages::share_title(db, &uid, &group_ids, media_type(kind)?, media_id(id)?).await?;
                for group_id in &group_ids {
                    self.notify_group(group_id).await;
                }
                Ok(format!("Shared to {} groups", sent.len()))
            }
            ("/messages", [token, group_id, rest @ ..]) if rest.len() <= 1 => {
                let uid = self.session(token).await?;
                let limit = match rest.first() {
                    Some(l) => Some(l.parse::<i64>().map_err(|_| ServiceError::InvalidInput(format!("'{}' is not a valid limit", l)))?),
                    None => None,
                };
                json(&messages::list_messages(db, &uid, group_id, limit).await?)
            }

            // WATCHLIST
            ("/watchlist", [token]) => {
                let uid = self.session(token).await?;
                json(&watchlist::list(db, &uid).await?)
            }
            ("/watchlist_add", [token, kind, id, vote, poster, title @ ..]) if !title.is_empty() => {
                let uid = self.session(token).await?;
                let entry = new_entry(kind, id, vote, poster, title)?;
                let saved = watchlist::add(db, &uid, &entry).await?;
                self.feed.publish(Topic::Watchlist(uid));
                json(&saved)
            }
            ("/watchlist_toggle", [token, kind, id, vote, poster, title @ ..]) if !title.is_empty() => {
                let uid = self.session(token).await?;
                let entry = new_entry(kind, id, vote, poster, title)?;
                let listed = watchlist::toggle(db, &uid, &entry).await?;
                self.feed.publish(Topic::Watchlist(uid));
                Ok(if listed { "Added to watchlist" } else { "Removed from watchlist" }.to_string())
            }
            ("/watchlist_get", [token, key]) => {
                let uid = self.session(token).await?;
                let key = watchlist_key(key)?;
                let entry = watchlist::get(db, &uid, key)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound("Watchlist entry".to_string()))?;
                json(&entry)
            }
            ("/watchlist_status", [token, key, status]) => {
                let uid = self.session(token).await?;
                let status: WatchStatus = status.parse().map_err(ServiceError::InvalidInput)?;
                let entry = watchlist::set_status(db, &uid, watchlist_key(key)?, status).await?;
                self.feed.publish(Topic::Watchlist(uid));
                json(&entry)
            }
            ("/watchlist_remove", [token, key]) => {
                let uid = self.session(token).await?;
                if watchlist::remove(db, &uid, watchlist_key(key)?).await? {
                    self.feed.publish(Topic::Watchlist(uid));
                    Ok("Removed from watchlist".to_string())
                } else {
                    Ok("Not on watchlist".to_string())
                }
            }

            // SYSTEM
            ("/help", _) => Ok(HELP.to_string()),
            ("/quit", _) => Ok("Disconnected".to_string()),
            _ => Err(ServiceError::InvalidInput(format!("Unknown command or wrong arguments: {}. Type /help", cmd))),
        }
    }
}

/// Line loop shared by plain TCP and TLS connections.
async fn handle_client<S>(server: Server, stream: S, peer: std::net::SocketAddr) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut writer = BufWriter::new(writer);
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            info!("[SERVER] Client disconnected: {}", peer);
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.split_whitespace();
        let cmd = parts.next().unwrap_or("");
        let args: Vec<&str> = parts.collect();
        let response = server.handle_command(cmd, &args).await;
        writer.write_all(response.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        if cmd == "/quit" {
            info!("[SERVER] Client quit: {}", peer);
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_dash_means_absent() {
        assert_eq!(optional("-"), None);
        assert_eq!(optional("/p.jpg"), Some("/p.jpg"));
    }

    #[test]
    fn new_entry_parses_positional_arguments() {
        let e = new_entry("tv", "1399", "8.4", "-", &["Game", "of", "Thrones"]).unwrap();
        assert_eq!(e.media_type, MediaType::Series);
        assert_eq!(e.title, "Game of Thrones");
        assert_eq!(e.vote_average, Some(8.4));
        assert_eq!(e.poster_path, None);
        assert!(new_entry("book", "1", "-", "-", &["x"]).is_err());
        assert!(new_entry("movie", "abc", "-", "-", &["x"]).is_err());
    }
}
