use crate::server::feed::{Change, ChangeFeed};
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use tokio::sync::broadcast::error::RecvError;
use log::{info, warn, error};

/// Redis channel every instance publishes its changes to.
pub const CHANGES_CHANNEL: &str = "movier:changes";

/// Relays change-feed events between server instances over Redis pub/sub.
///
/// Local changes are published to [`CHANGES_CHANNEL`]; changes arriving from other
/// instances are injected into the local feed. An instance ignores its own echoes.
pub async fn start(redis_url: &str, feed: ChangeFeed) -> anyhow::Result<()> {
    let client = redis::Client::open(redis_url)?;
    let manager = ConnectionManager::new(client.clone()).await?;
    info!("[REDIS] Connected, relaying changes on '{}'", CHANGES_CHANNEL);

    tokio::spawn(publish_local(manager, feed.clone()));
    tokio::spawn(subscribe_remote(client, feed));
    Ok(())
}

async fn publish_local(mut conn: ConnectionManager, feed: ChangeFeed) {
    let mut rx = feed.subscribe();
    loop {
        let change = match rx.recv().await {
            Ok(change) => change,
            Err(RecvError::Lagged(n)) => {
                warn!("[REDIS] Publisher lagged, {} changes not relayed", n);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if change.origin != feed.instance_id() {
            continue;
        }
        let payload = match serde_json::to_string(&change) {
            Ok(p) => p,
            Err(e) => {
                error!("[REDIS] Could not encode change {}: {}", change.topic, e);
                continue;
            }
        };
        let res: Result<(), _> = redis::cmd("PUBLISH")
            .arg(CHANGES_CHANNEL)
            .arg(&payload)
            .query_async(&mut conn)
            .await;
        if let Err(e) = res {
            warn!("[REDIS] PUBLISH failed for {}: {}", change.topic, e);
        }
    }
}

async fn subscribe_remote(client: redis::Client, feed: ChangeFeed) {
    loop {
        match client.get_async_connection().await {
            Ok(con) => {
                let mut pubsub = con.into_pubsub();
                if let Err(e) = pubsub.subscribe(CHANGES_CHANNEL).await {
                    warn!("[REDIS] Subscribe failed: {}", e);
                } else {
                    info!("[REDIS] Subscribed to '{}'", CHANGES_CHANNEL);
                    let mut stream = pubsub.on_message();
                    while let Some(msg) = stream.next().await {
                        let payload: String = match msg.get_payload() {
                            Ok(p) => p,
                            Err(_) => continue,
                        };
                        match serde_json::from_str::<Change>(&payload) {
                            Ok(change) if change.origin != feed.instance_id() => feed.deliver(change),
                            Ok(_) => {}
                            Err(e) => warn!("[REDIS] Ignoring malformed change '{}': {}", payload, e),
                        }
                    }
                    warn!("[REDIS] Subscription stream ended");
                }
            }
            Err(e) => warn!("[REDIS] Failed to connect for pub/sub: {}", e),
        }
        info!("[REDIS] Subscriber disconnected, retrying in 5 seconds...");
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
    }
}
