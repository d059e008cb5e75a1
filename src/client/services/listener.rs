use tokio_tungstenite::{connect_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use serde::{Serialize, Deserialize};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use log::{info, warn, debug};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AuthMessage {
    #[serde(rename = "type")]
    message_type: String, // "auth"
    session_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AuthResponse {
    #[serde(rename = "type")]
    message_type: String, // "auth_response"
    success: bool,
    user_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenTarget {
    GroupMessages,
    MyGroups,
    Watchlist,
}

impl ListenTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenTarget::GroupMessages => "group_messages",
            ListenTarget::MyGroups => "my_groups",
            ListenTarget::Watchlist => "watchlist",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Request {
    Listen { target: &'static str, id: String },
    Unlisten { target: &'static str, id: String },
}

/// What the server pushes on the listener channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ListenerEvent {
    Snapshot { topic: String, data: serde_json::Value },
    Unlistened { topic: String },
    Error { topic: Option<String>, message: String },
    /// Emitted locally when the connection drops.
    #[serde(skip)]
    Disconnected,
}

impl ListenerEvent {
    /// Decodes the snapshot payload, e.g. into `Vec<Message>` for a group topic.
    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        match self {
            ListenerEvent::Snapshot { data, .. } => serde_json::from_value(data.clone()).ok(),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Operation timed out")]
    Timeout,
}

/// WebSocket client for snapshot listeners.
pub struct ListenerClient {
    url: String,
    session_token: String,
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    events_tx: mpsc::UnboundedSender<ListenerEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<ListenerEvent>>,
}

impl ListenerClient {
    pub fn new(url: impl Into<String>, session_token: impl Into<String>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            url: url.into(),
            session_token: session_token.into(),
            outgoing: None,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Hands out the event stream. Can be taken once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ListenerEvent>> {
        self.events_rx.take()
    }

    pub fn is_connected(&self) -> bool {
        self.outgoing.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Connects and authenticates. Returns the user id the server resolved.
    pub async fn connect(&mut self) -> Result<String, ListenerError> {
        info!("[WS:CLIENT] Connecting to {}", self.url);
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ListenerError::ConnectionFailed(e.to_string()))?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let auth = AuthMessage { message_type: "auth".to_string(), session_token: self.session_token.clone() };
        let auth_json = serde_json::to_string(&auth).map_err(|e| ListenerError::AuthenticationFailed(e.to_string()))?;
        ws_sender
            .send(Message::Text(auth_json))
            .await
            .map_err(|e| ListenerError::AuthenticationFailed(format!("Failed to send auth message: {}", e)))?;

        let reply = tokio::time::timeout(tokio::time::Duration::from_secs(10), ws_receiver.next())
            .await
            .map_err(|_| ListenerError::Timeout)?;
        let auth_response = match reply {
            Some(Ok(Message::Text(text))) => serde_json::from_str::<AuthResponse>(&text)
                .map_err(|e| ListenerError::AuthenticationFailed(format!("Invalid auth response: {}", e)))?,
            Some(Ok(_)) => return Err(ListenerError::AuthenticationFailed("Unexpected frame during auth".to_string())),
            Some(Err(e)) => return Err(ListenerError::AuthenticationFailed(e.to_string())),
            None => return Err(ListenerError::AuthenticationFailed("Connection closed during auth".to_string())),
        };
        if !auth_response.success {
            let error = auth_response.error.unwrap_or_else(|| "Unknown authentication error".to_string());
            return Err(ListenerError::AuthenticationFailed(error));
        }
        let user_id = auth_response.user_id.unwrap_or_default();
        info!("[WS:CLIENT] Authenticated as {}", user_id);

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if let Err(e) = ws_sender.send(message).await {
                    warn!("[WS:CLIENT] Failed to send frame: {}", e);
                    break;
                }
            }
        });

        let events = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(message) = ws_receiver.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ListenerEvent>(&text) {
                        Ok(event) => {
                            if events.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!("[WS:CLIENT] Ignoring unreadable frame: {}", e),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            let _ = events.send(ListenerEvent::Disconnected);
        });

        self.outgoing = Some(out_tx);
        Ok(user_id)
    }

    fn request(&self, request: Request) -> Result<(), ListenerError> {
        let outgoing = self.outgoing.as_ref().ok_or(ListenerError::NotConnected)?;
        let json = serde_json::to_string(&request).map_err(|_| ListenerError::NotConnected)?;
        outgoing.send(Message::Text(json)).map_err(|_| ListenerError::NotConnected)
    }

    pub fn listen(&self, target: ListenTarget, id: &str) -> Result<(), ListenerError> {
        self.request(Request::Listen { target: target.as_str(), id: id.to_string() })
    }

    pub fn unlisten(&self, target: ListenTarget, id: &str) -> Result<(), ListenerError> {
        self.request(Request::Unlisten { target: target.as_str(), id: id.to_string() })
    }

    pub fn close(&mut self) {
        if let Some(outgoing) = self.outgoing.take() {
            let _ = outgoing.send(Message::Close(None));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::models::{MediaType, NewWatchlistEntry, WatchlistEntry};
    use crate::server::{auth, config::ServerConfig, database::Database, feed::{ChangeFeed, Topic}, watchlist};
    use crate::server::websocket::ListenerServer;
    use std::sync::Arc;
    use tokio::time::{timeout, Duration};

    #[test]
    fn requests_and_events_use_type_tags() {
        let json = serde_json::to_value(Request::Listen { target: ListenTarget::MyGroups.as_str(), id: "u1".into() }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "listen", "target": "my_groups", "id": "u1"}));

        let event: ListenerEvent = serde_json::from_str(r#"{"type":"snapshot","topic":"user:u1:watchlist","data":[]}"#).unwrap();
        assert_eq!(event.decode::<Vec<WatchlistEntry>>(), Some(vec![]));
    }

    #[tokio::test]
    async fn watchlist_listener_follows_changes() {
        let db = Arc::new(Database::connect_in_memory().await.unwrap());
        let feed = ChangeFeed::default();
        let session = auth::sign_up(db.clone(), "ana@x.io", "secret1", "Ana", &ServerConfig::default()).await.unwrap();

        let tcp = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        let server = ListenerServer::new(db.clone(), feed.clone());
        tokio::spawn(async move { server.serve(tcp).await });

        let mut client = ListenerClient::new(format!("ws://{}", addr), session.token.clone());
        let mut events = client.take_events().unwrap();
        assert_eq!(client.connect().await.unwrap(), session.user_id);
        client.listen(ListenTarget::Watchlist, &session.user_id).unwrap();

        let first = timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
        assert_eq!(first.decode::<Vec<WatchlistEntry>>().unwrap().len(), 0);

        let entry = NewWatchlistEntry {
            media_type: MediaType::Movie,
            media_id: 603,
            title: "The Matrix".into(),
            vote_average: Some(8.2),
            poster_path: None,
        };
        watchlist::add(db.clone(), &session.user_id, &entry).await.unwrap();
        feed.publish(Topic::Watchlist(session.user_id.clone()));

        let second = timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
        let entries = second.decode::<Vec<WatchlistEntry>>().unwrap();
        assert_eq!(entries[0].id, "M603");
    }

    #[tokio::test]
    async fn bad_session_fails_to_connect() {
        let db = Arc::new(Database::connect_in_memory().await.unwrap());
        let tcp = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        let server = ListenerServer::new(db, ChangeFeed::default());
        tokio::spawn(async move { server.serve(tcp).await });

        let mut client = ListenerClient::new(format!("ws://{}", addr), "nope");
        assert!(matches!(client.connect().await, Err(ListenerError::AuthenticationFailed(_))));
        assert!(!client.is_connected());
    }
}
