use crate::common::models::{
    Group, GroupInfo, GroupMembership, MediaType, Message, NewWatchlistEntry, Session, UserProfile,
    WatchStatus, WatchlistEntry, WatchlistKey,
};
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{mpsc, oneshot};
use log::{debug, warn};

type Request = (String, oneshot::Sender<String>);

/// Splits a protocol reply into its payload, turning `ERR:` into an error.
pub fn parse_reply(resp: &str) -> anyhow::Result<&str> {
    if let Some(rest) = resp.strip_prefix("OK:") {
        Ok(rest.trim())
    } else if let Some(rest) = resp.strip_prefix("ERR:") {
        Err(anyhow::anyhow!("{}", rest.trim()))
    } else {
        Err(anyhow::anyhow!("Unexpected server reply: {}", resp))
    }
}

pub fn parse_json<T: DeserializeOwned>(resp: &str) -> anyhow::Result<T> {
    Ok(serde_json::from_str(parse_reply(resp)?)?)
}

/// Reads `<...> as <user id> SESSION: <token>` replies from `/signup` and `/login`.
pub fn parse_session(resp: &str) -> anyhow::Result<Session> {
    let body = parse_reply(resp)?;
    let (head, token) = body
        .split_once("SESSION:")
        .ok_or_else(|| anyhow::anyhow!("No session in reply: {}", body))?;
    let user_id = head
        .trim()
        .rsplit(' ')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("No user id in reply: {}", body))?;
    Ok(Session { user_id: user_id.to_string(), token: token.trim().to_string() })
}

fn entry_args(entry: &NewWatchlistEntry) -> String {
    let vote = entry.vote_average.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());
    let poster = entry.poster_path.clone().filter(|p| !p.contains(char::is_whitespace)).unwrap_or_else(|| "-".to_string());
    format!("{} {} {} {} {}", entry.media_type.api_path(), entry.media_id, vote, poster, entry.title)
}

/// Line-protocol client. One background task owns the connection and answers requests
/// in order. A broken connection fails the request in flight; the next request reconnects.
pub struct ChatService {
    host: String,
    tx: Option<mpsc::UnboundedSender<Request>>,
    _bg: Option<tokio::task::JoinHandle<()>>,
}

impl ChatService {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into(), tx: None, _bg: None }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Drop the connection and its background task.
    pub fn reset(&mut self) {
        self.tx = None;
        if let Some(handle) = self._bg.take() {
            handle.abort();
        }
    }

    async fn ensure_connected(&mut self) -> anyhow::Result<()> {
        if self.tx.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Ok(());
        }
        let stream = TcpStream::connect(&self.host).await?;
        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::new(writer);
        let (tx, mut rx) = mpsc::unbounded_channel::<Request>();

        let handle = tokio::spawn(async move {
            let mut line = String::new();
            while let Some((cmd, resp_tx)) = rx.recv().await {
                let sent = async {
                    writer.write_all(cmd.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = sent {
                    warn!("[CLIENT:SVC] write failed: {}", e);
                    let _ = resp_tx.send(format!("ERR: connection lost: {}", e));
                    break;
                }
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        let _ = resp_tx.send("ERR: server closed the connection".to_string());
                        break;
                    }
                    Ok(_) => {
                        let _ = resp_tx.send(line.trim().to_string());
                    }
                    Err(e) => {
                        warn!("[CLIENT:SVC] read failed: {}", e);
                        let _ = resp_tx.send(format!("ERR: connection lost: {}", e));
                        break;
                    }
                }
            }
        });

        self.tx = Some(tx);
        self._bg = Some(handle);
        Ok(())
    }

    /// Send a raw command line and wait for the single-line reply.
    pub async fn send_command(&mut self, cmd: String) -> anyhow::Result<String> {
        self.ensure_connected().await?;
        let tx = self.tx.as_ref().ok_or_else(|| anyhow::anyhow!("not connected"))?;
        debug!("[CLIENT:SVC] -> {}", cmd.split_whitespace().next().unwrap_or(""));
        let (resp_tx, resp_rx) = oneshot::channel();
        tx.send((cmd, resp_tx)).map_err(|_| anyhow::anyhow!("send failed: background task ended"))?;
        let resp = resp_rx.await.map_err(|_| anyhow::anyhow!("response channel closed before response"))?;
        if resp.starts_with("ERR: connection lost") || resp.starts_with("ERR: server closed") {
            self.reset();
        }
        Ok(resp)
    }

    async fn call(&mut self, cmd: String) -> anyhow::Result<String> {
        let resp = self.send_command(cmd).await?;
        parse_reply(&resp).map(str::to_string)
    }

    async fn call_json<T: DeserializeOwned>(&mut self, cmd: String) -> anyhow::Result<T> {
        let resp = self.send_command(cmd).await?;
        parse_json(&resp)
    }

    // AUTH

    pub async fn sign_up(&mut self, email: &str, password: &str, display_name: &str) -> anyhow::Result<Session> {
        let resp = self.send_command(format!("/signup {} {} {}", email, password, display_name)).await?;
        parse_session(&resp)
    }

    pub async fn sign_in(&mut self, email: &str, password: &str) -> anyhow::Result<Session> {
        let resp = self.send_command(format!("/login {} {}", email, password)).await?;
        parse_session(&resp)
    }

    pub async fn sign_out(&mut self, token: &str) -> anyhow::Result<()> {
        self.call(format!("/logout {}", token)).await.map(|_| ())
    }

    pub async fn validate_session(&mut self, token: &str) -> anyhow::Result<String> {
        self.call(format!("/validate_session {}", token)).await
    }

    pub async fn request_password_reset(&mut self, email: &str) -> anyhow::Result<String> {
        self.call(format!("/reset_password {}", email)).await
    }

    pub async fn confirm_password_reset(&mut self, reset_token: &str, new_password: &str) -> anyhow::Result<String> {
        self.call(format!("/confirm_reset {} {}", reset_token, new_password)).await
    }

    // PROFILE

    pub async fn profile(&mut self, token: &str, user_id: Option<&str>) -> anyhow::Result<UserProfile> {
        match user_id {
            Some(uid) => self.call_json(format!("/profile {} {}", token, uid)).await,
            None => self.call_json(format!("/profile {}", token)).await,
        }
    }

    pub async fn update_name(&mut self, token: &str, name: &str) -> anyhow::Result<String> {
        self.call(format!("/update_name {} {}", token, name)).await
    }

    pub async fn update_photo(&mut self, token: &str, url: Option<&str>) -> anyhow::Result<String> {
        self.call(format!("/update_photo {} {}", token, url.unwrap_or(""))).await
    }

    // GROUPS

    pub async fn create_group(&mut self, token: &str, name: &str) -> anyhow::Result<Group> {
        self.call_json(format!("/create_group {} {}", token, name)).await
    }

    pub async fn join_group(&mut self, token: &str, code: &str) -> anyhow::Result<GroupMembership> {
        self.call_json(format!("/join_group {} {}", token, code)).await
    }

    pub async fn my_groups(&mut self, token: &str) -> anyhow::Result<Vec<GroupMembership>> {
        self.call_json(format!("/my_groups {}", token)).await
    }

    pub async fn group_info(&mut self, token: &str, group_id: &str) -> anyhow::Result<GroupInfo> {
        self.call_json(format!("/group_info {} {}", token, group_id)).await
    }

    pub async fn invite_code(&mut self, token: &str, group_id: &str) -> anyhow::Result<String> {
        self.call(format!("/invite_code {} {}", token, group_id)).await
    }

    pub async fn rename_group(&mut self, token: &str, group_id: &str, name: &str) -> anyhow::Result<String> {
        self.call(format!("/rename_group {} {} {}", token, group_id, name)).await
    }

    pub async fn delete_group(&mut self, token: &str, group_id: &str) -> anyhow::Result<String> {
        self.call(format!("/delete_group {} {}", token, group_id)).await
    }

    pub async fn leave_group(&mut self, token: &str, group_id: &str) -> anyhow::Result<String> {
        self.call(format!("/leave_group {} {}", token, group_id)).await
    }

    // MESSAGES

    pub async fn send_message(&mut self, token: &str, group_id: &str, text: &str) -> anyhow::Result<Message> {
        self.call_json(format!("/send {} {} {}", token, group_id, text)).await
    }

    pub async fn share_title(&mut self, token: &str, media_type: MediaType, media_id: i64, group_ids: &[String]) -> anyhow::Result<String> {
        self.call(format!("/share {} {} {} {}", token, media_type.api_path(), media_id, group_ids.join(" "))).await
    }

    pub async fn messages(&mut self, token: &str, group_id: &str, limit: Option<i64>) -> anyhow::Result<Vec<Message>> {
        match limit {
            Some(n) => self.call_json(format!("/messages {} {} {}", token, group_id, n)).await,
            None => self.call_json(format!("/messages {} {}", token, group_id)).await,
        }
    }

    // WATCHLIST

    pub async fn watchlist(&mut self, token: &str) -> anyhow::Result<Vec<WatchlistEntry>> {
        self.call_json(format!("/watchlist {}", token)).await
    }

    pub async fn watchlist_add(&mut self, token: &str, entry: &NewWatchlistEntry) -> anyhow::Result<WatchlistEntry> {
        self.call_json(format!("/watchlist_add {} {}", token, entry_args(entry))).await
    }

    /// Returns whether the title is on the watchlist afterwards.
    pub async fn watchlist_toggle(&mut self, token: &str, entry: &NewWatchlistEntry) -> anyhow::Result<bool> {
        let reply = self.call(format!("/watchlist_toggle {} {}", token, entry_args(entry))).await?;
        Ok(reply.starts_with("Added"))
    }

    pub async fn watchlist_get(&mut self, token: &str, key: WatchlistKey) -> anyhow::Result<WatchlistEntry> {
        self.call_json(format!("/watchlist_get {} {}", token, key)).await
    }

    pub async fn watchlist_status(&mut self, token: &str, key: WatchlistKey, status: WatchStatus) -> anyhow::Result<WatchlistEntry> {
        self.call_json(format!("/watchlist_status {} {} {}", token, key, status)).await
    }

    pub async fn watchlist_remove(&mut self, token: &str, key: WatchlistKey) -> anyhow::Result<String> {
        self.call(format!("/watchlist_remove {} {}", token, key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_split_into_ok_and_err() {
        assert_eq!(parse_reply("OK: Logged out").unwrap(), "Logged out");
        assert_eq!(parse_reply("ERR: Invalid invite code!").unwrap_err().to_string(), "Invalid invite code!");
        assert!(parse_reply("garbage").is_err());
    }

    #[test]
    fn session_is_read_from_login_reply() {
        let s = parse_session("OK: Logged in as u-1 SESSION: tok-9").unwrap();
        assert_eq!(s, Session { user_id: "u-1".into(), token: "tok-9".into() });
        assert!(parse_session("OK: Logged in").is_err());
    }

    #[test]
    fn watchlist_arguments_are_positional() {
        let entry = NewWatchlistEntry {
            media_type: MediaType::Series,
            media_id: 1399,
            title: "Game of Thrones".into(),
            vote_average: None,
            poster_path: Some("/got.jpg".into()),
        };
        assert_eq!(entry_args(&entry), "tv 1399 - /got.jpg Game of Thrones");
    }
}
