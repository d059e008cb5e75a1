use crate::server::auth;
use crate::server::database::Database;
use crate::server::feed::{Change, ChangeFeed, Topic};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{WebSocketStream, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use serde::{Serialize, Deserialize};
use log::{info, warn, debug};

const AUTH_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthMessage {
    #[serde(rename = "type")]
    pub message_type: String, // "auth"
    pub session_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(rename = "type")]
    pub message_type: String, // "auth_response"
    pub success: bool,
    pub user_id: Option<String>,
    pub error: Option<String>,
}

impl AuthResponse {
    fn failure(error: impl Into<String>) -> Self {
        Self { message_type: "auth_response".to_string(), success: false, user_id: None, error: Some(error.into()) }
    }

    fn success(user_id: &str) -> Self {
        Self { message_type: "auth_response".to_string(), success: true, user_id: Some(user_id.to_string()), error: None }
    }
}

/// Frames a client sends once authenticated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Listen { target: String, id: String },
    Unlisten { target: String, id: String },
}

/// Frames the server pushes to an authenticated client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Snapshot { topic: Topic, data: serde_json::Value },
    Unlistened { topic: Topic },
    Error { topic: Option<Topic>, message: String },
}

fn encode<T: Serialize>(frame: &T) -> Option<Message> {
    serde_json::to_string(frame).ok().map(Message::Text)
}

/// Pushes snapshots of watched topics to WebSocket clients.
#[derive(Clone)]
pub struct ListenerServer {
    db: Arc<Database>,
    feed: ChangeFeed,
}

impl ListenerServer {
    pub fn new(db: Arc<Database>, feed: ChangeFeed) -> Self {
        Self { db, feed }
    }

    pub async fn run(&self, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("[WS] Listener server on {}", addr);
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            info!("[WS] New WebSocket connection from {}", peer);
            let server = self.clone();
            tokio::spawn(async move {
                match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws_stream) => {
                        if let Err(e) = server.handle_connection(ws_stream).await {
                            warn!("[WS] Connection {} ended with error: {}", peer, e);
                        }
                    }
                    Err(e) => warn!("[WS] Handshake with {} failed: {}", peer, e),
                }
            });
        }
    }

    async fn authenticate<S>(&self, ws_stream: &mut WebSocketStream<S>) -> anyhow::Result<Option<String>>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let first = tokio::time::timeout(tokio::time::Duration::from_secs(AUTH_TIMEOUT_SECS), ws_stream.next()).await;
        let auth = match first {
            Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<AuthMessage>(&text) {
                Ok(auth) if auth.message_type == "auth" => auth,
                Ok(_) => {
                    ws_stream.send(Message::Text(serde_json::to_string(&AuthResponse::failure("Invalid message type, expected 'auth'"))?)).await?;
                    return Ok(None);
                }
                Err(e) => {
                    ws_stream.send(Message::Text(serde_json::to_string(&AuthResponse::failure(format!("Invalid JSON: {}", e)))?)).await?;
                    return Ok(None);
                }
            },
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                debug!("[WS:AUTH] Client closed connection during auth");
                return Ok(None);
            }
            Ok(Some(Ok(_))) => {
                ws_stream.send(Message::Text(serde_json::to_string(&AuthResponse::failure("Expected text message for authentication"))?)).await?;
                return Ok(None);
            }
            Ok(Some(Err(e))) => return Err(e.into()),
            Err(_) => {
                warn!("[WS:AUTH] Authentication timeout");
                ws_stream.send(Message::Text(serde_json::to_string(&AuthResponse::failure("Authentication timeout"))?)).await?;
                return Ok(None);
            }
        };

        match auth::validate_session(self.db.clone(), &auth.session_token).await {
            Ok(user_id) => {
                ws_stream.send(Message::Text(serde_json::to_string(&AuthResponse::success(&user_id))?)).await?;
                info!("[WS:AUTH] Authentication successful for user: {}", user_id);
                Ok(Some(user_id))
            }
            Err(e) => {
                ws_stream.send(Message::Text(serde_json::to_string(&AuthResponse::failure(e.to_string()))?)).await?;
                info!("[WS:AUTH] Authentication failed");
                Ok(None)
            }
        }
    }

    pub async fn handle_connection<S>(&self, mut ws_stream: WebSocketStream<S>) -> anyhow::Result<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let Some(user_id) = self.authenticate(&mut ws_stream).await? else {
            return Ok(());
        };

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let send_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if ws_sender.send(message).await.is_err() {
                    break;
                }
            }
        });

        let mut listeners: HashMap<Topic, JoinHandle<()>> = HashMap::new();
        while let Some(message) = ws_receiver.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };
            let frame = match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    let err = ServerFrame::Error { topic: None, message: format!("Invalid frame: {}", e) };
                    if let Some(m) = encode(&err) { let _ = tx.send(m); }
                    continue;
                }
            };
            match frame {
                ClientFrame::Listen { target, id } => {
                    let Some(topic) = Topic::from_target(&target, &id) else {
                        let err = ServerFrame::Error { topic: None, message: format!("Unknown listen target '{}'", target) };
                        if let Some(m) = encode(&err) { let _ = tx.send(m); }
                        continue;
                    };
                    if let Err(e) = topic.authorize(self.db.clone(), &user_id).await {
                        let err = ServerFrame::Error { topic: Some(topic), message: e.to_string() };
                        if let Some(m) = encode(&err) { let _ = tx.send(m); }
                        continue;
                    }
                    if let Some(old) = listeners.remove(&topic) {
                        old.abort();
                    }
                    info!("[WS] {} listens to {}", user_id, topic);
                    // Subscribe before the first snapshot so no change slips between them.
                    let changes = self.feed.subscribe();
                    let handle = tokio::spawn(stream_topic(self.db.clone(), changes, topic.clone(), user_id.clone(), tx.clone()));
                    listeners.insert(topic, handle);
                }
                ClientFrame::Unlisten { target, id } => {
                    let Some(topic) = Topic::from_target(&target, &id) else { continue };
                    if let Some(handle) = listeners.remove(&topic) {
                        handle.abort();
                        info!("[WS] {} stopped listening to {}", user_id, topic);
                    }
                    if let Some(m) = encode(&ServerFrame::Unlistened { topic }) { let _ = tx.send(m); }
                }
            }
        }

        for (_, handle) in listeners.drain() {
            handle.abort();
        }
        send_task.abort();
        info!("[WS] Connection for {} closed", user_id);
        Ok(())
    }
}

/// Sends a snapshot now and again after every change to `topic`. A lagging receiver
/// goes straight to a fresh snapshot. Ends when the topic is no longer readable.
async fn stream_topic(
    db: Arc<Database>,
    mut changes: broadcast::Receiver<Change>,
    topic: Topic,
    user_id: String,
    out: mpsc::UnboundedSender<Message>,
) {
    loop {
        let frame = match topic.snapshot(db.clone(), &user_id).await {
            Ok(data) => ServerFrame::Snapshot { topic: topic.clone(), data },
            Err(e) => {
                if let Some(m) = encode(&ServerFrame::Error { topic: Some(topic.clone()), message: e.to_string() }) {
                    let _ = out.send(m);
                }
                return;
            }
        };
        let Some(message) = encode(&frame) else { return };
        if out.send(message).is_err() {
            return;
        }

        loop {
            match changes.recv().await {
                Ok(change) if change.topic == topic => break,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("[WS] Listener on {} lagged by {}", topic, n);
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::ServerConfig;
    use crate::server::{groups, messages};
    use tokio::time::{timeout, Duration};

    async fn next_frame<S>(ws: &mut WebSocketStream<S>) -> serde_json::Value
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        loop {
            let msg = timeout(Duration::from_secs(5), ws.next()).await.unwrap().unwrap().unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[test]
    fn frames_use_type_tags() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"listen","target":"watchlist","id":"u1"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Listen { target: "watchlist".into(), id: "u1".into() });

        let out = serde_json::to_value(ServerFrame::Unlistened { topic: Topic::Watchlist("u1".into()) }).unwrap();
        assert_eq!(out["type"], "unlistened");
        assert_eq!(out["topic"], "user:u1:watchlist");
    }

    #[tokio::test]
    async fn listener_gets_snapshots_until_unlisten() {
        let db = Arc::new(Database::connect_in_memory().await.unwrap());
        let cfg = ServerConfig::default();
        let feed = ChangeFeed::default();
        let session = auth::sign_up(db.clone(), "ana@x.io", "secret1", "Ana", &cfg).await.unwrap();
        let group = groups::create_group(db.clone(), &session.user_id, "Films").await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = ListenerServer::new(db.clone(), feed.clone());
        tokio::spawn(async move { server.serve(listener).await });

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr)).await.unwrap();
        let auth = serde_json::json!({"type": "auth", "session_token": session.token});
        ws.send(Message::Text(auth.to_string())).await.unwrap();
        let resp = next_frame(&mut ws).await;
        assert_eq!(resp["type"], "auth_response");
        assert_eq!(resp["success"], true);

        let listen = serde_json::json!({"type": "listen", "target": "group_messages", "id": group.id});
        ws.send(Message::Text(listen.to_string())).await.unwrap();
        let first = next_frame(&mut ws).await;
        assert_eq!(first["type"], "snapshot");
        assert_eq!(first["data"].as_array().unwrap().len(), 0);

        messages::send_message(db.clone(), &session.user_id, &group.id, "hello", &cfg).await.unwrap();
        feed.publish(Topic::GroupMessages(group.id.clone()));
        let second = next_frame(&mut ws).await;
        assert_eq!(second["data"][0]["message"], "hello");

        let unlisten = serde_json::json!({"type": "unlisten", "target": "group_messages", "id": group.id});
        ws.send(Message::Text(unlisten.to_string())).await.unwrap();
        assert_eq!(next_frame(&mut ws).await["type"], "unlistened");

        feed.publish(Topic::GroupMessages(group.id.clone()));
        assert!(timeout(Duration::from_millis(300), ws.next()).await.is_err());
    }

    #[tokio::test]
    async fn bad_token_is_rejected() {
        let db = Arc::new(Database::connect_in_memory().await.unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = ListenerServer::new(db, ChangeFeed::default());
        tokio::spawn(async move { server.serve(listener).await });

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr)).await.unwrap();
        let auth = serde_json::json!({"type": "auth", "session_token": "nope"});
        ws.send(Message::Text(auth.to_string())).await.unwrap();
        let resp = next_frame(&mut ws).await;
        assert_eq!(resp["success"], false);
    }
}
