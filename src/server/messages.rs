use crate::common::models::{MediaType, Message, MessageBody};
use crate::server::config::ServerConfig;
use crate::server::database::{Database, now_millis};
use crate::server::error::{ServiceError, ServiceResult};
use crate::server::{groups, users};
use std::sync::Arc;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use log::{info, warn};

fn message_from_row(row: &SqliteRow) -> Option<Message> {
    let kind: String = row.get("kind");
    let payload: String = row.get("body");
    let id: i64 = row.get("id");
    let Some(body) = MessageBody::from_parts(&kind, &payload) else {
        warn!("[MSG] Skipping message {} with unreadable body (kind '{}')", id, kind);
        return None;
    };
    Some(Message {
        id,
        group_id: row.get("group_id"),
        sender_id: row.get("sender_id"),
        sender_name: row.get("sender_name"),
        body,
        sent_at: row.get("sent_at"),
    })
}

async fn append(db: &Database, group_id: &str, sender_id: &str, sender_name: &str, body: MessageBody) -> ServiceResult<Message> {
    let sent_at = now_millis();
    let res = sqlx::query("INSERT INTO messages (group_id, sender_id, sender_name, kind, body, sent_at) VALUES (?, ?, ?, ?, ?, ?)")
        .bind(group_id)
        .bind(sender_id)
        .bind(sender_name)
        .bind(body.kind())
        .bind(body.payload())
        .bind(sent_at)
        .execute(&db.pool)
        .await?;
    Ok(Message {
        id: res.last_insert_rowid(),
        group_id: group_id.to_string(),
        sender_id: sender_id.to_string(),
        sender_name: sender_name.to_string(),
        body,
        sent_at,
    })
}

pub async fn send_message(db: Arc<Database>, user_id: &str, group_id: &str, text: &str, config: &ServerConfig) -> ServiceResult<Message> {
    if text.trim().is_empty() {
        return Err(ServiceError::InvalidInput("Message cannot be empty".to_string()));
    }
    if text.len() > config.max_message_length {
        return Err(ServiceError::InvalidInput(format!("Message too long (max {} bytes)", config.max_message_length)));
    }
    groups::member_group(db.clone(), group_id, user_id).await?;
    let sender = users::get_profile(db.clone(), user_id).await?;

    let msg = append(&db, group_id, user_id, &sender.display_name, MessageBody::Text(text.to_string())).await?;
    info!("[MSG] {} -> group {} (id={})", user_id, group_id, msg.id);
    Ok(msg)
}

/// Posts a card for the title into each group, one write per group.
///
/// Membership of every group is checked up front. The writes themselves are independent,
/// so a failure part-way leaves the earlier cards posted.
pub async fn share_title(db: Arc<Database>, user_id: &str, group_ids: &[String], media_type: MediaType, media_id: i64) -> ServiceResult<Vec<Message>> {
    if group_ids.is_empty() {
        return Err(ServiceError::InvalidInput("Select at least one group".to_string()));
    }
    for group_id in group_ids {
        groups::member_group(db.clone(), group_id, user_id).await?;
    }
    let sender = users::get_profile(db.clone(), user_id).await?;

    let mut sent = Vec::with_capacity(group_ids.len());
    for group_id in group_ids {
        let body = MessageBody::card(media_type, media_id);
        sent.push(append(&db, group_id, user_id, &sender.display_name, body).await?);
    }
    info!("[MSG] {} shared {} {} to {} groups", user_id, media_type, media_id, sent.len());
    Ok(sent)
}

/// Newest first. Equal send times fall back to insertion order, latest first.
pub async fn list_messages(db: Arc<Database>, user_id: &str, group_id: &str, limit: Option<i64>) -> ServiceResult<Vec<Message>> {
    groups::member_group(db.clone(), group_id, user_id).await?;
    let rows = sqlx::query("SELECT id, group_id, sender_id, sender_name, kind, body, sent_at FROM messages
                            WHERE group_id = ? ORDER BY sent_at DESC, id DESC LIMIT ?")
        .bind(group_id)
        .bind(limit.unwrap_or(-1))
        .fetch_all(&db.pool)
        .await?;
    Ok(rows.iter().filter_map(message_from_row).collect())
}

pub async fn last_message(db: Arc<Database>, group_id: &str) -> ServiceResult<Option<Message>> {
    let row = sqlx::query("SELECT id, group_id, sender_id, sender_name, kind, body, sent_at FROM messages
                           WHERE group_id = ? ORDER BY sent_at DESC, id DESC LIMIT 1")
        .bind(group_id)
        .fetch_optional(&db.pool)
        .await?;
    Ok(row.as_ref().and_then(message_from_row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::crypto::InviteCodec;
    use crate::server::auth;

    async fn setup() -> (Arc<Database>, ServerConfig, String, String) {
        let db = Arc::new(Database::connect_in_memory().await.unwrap());
        let cfg = ServerConfig::default();
        let ana = auth::sign_up(db.clone(), "ana@x.io", "secret1", "Ana", &cfg).await.unwrap().user_id;
        let bo = auth::sign_up(db.clone(), "bo@x.io", "secret1", "Bo", &cfg).await.unwrap().user_id;
        (db, cfg, ana, bo)
    }

    #[tokio::test]
    async fn messages_list_newest_first() {
        let (db, cfg, ana, _) = setup().await;
        let g = groups::create_group(db.clone(), &ana, "Films").await.unwrap();
        for text in ["one", "two", "three"] {
            send_message(db.clone(), &ana, &g.id, text, &cfg).await.unwrap();
        }
        let texts: Vec<String> = list_messages(db.clone(), &ana, &g.id, None)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.body.payload())
            .collect();
        assert_eq!(texts, vec!["three", "two", "one"]);

        let limited = list_messages(db.clone(), &ana, &g.id, Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(last_message(db.clone(), &g.id).await.unwrap().unwrap().preview(), "Ana: three");
    }

    #[tokio::test]
    async fn send_validates_text_and_membership() {
        let (db, cfg, ana, bo) = setup().await;
        let g = groups::create_group(db.clone(), &ana, "Films").await.unwrap();
        assert!(matches!(send_message(db.clone(), &ana, &g.id, "  ", &cfg).await, Err(ServiceError::InvalidInput(_))));
        let long = "x".repeat(cfg.max_message_length + 1);
        assert!(matches!(send_message(db.clone(), &ana, &g.id, &long, &cfg).await, Err(ServiceError::InvalidInput(_))));
        // the limit counts bytes, so multi-byte text hits it with fewer characters
        let at_limit = "é".repeat(cfg.max_message_length / 2);
        assert!(send_message(db.clone(), &ana, &g.id, &at_limit, &cfg).await.is_ok());
        let over = "é".repeat(cfg.max_message_length / 2 + 1);
        match send_message(db.clone(), &ana, &g.id, &over, &cfg).await {
            Err(ServiceError::InvalidInput(msg)) => assert_eq!(msg, format!("Message too long (max {} bytes)", cfg.max_message_length)),
            other => panic!("expected a length error, got {:?}", other.map(|m| m.id)),
        }
        assert!(matches!(send_message(db.clone(), &bo, &g.id, "hi", &cfg).await, Err(ServiceError::Forbidden(_))));
        assert!(matches!(list_messages(db.clone(), &bo, &g.id, None).await, Err(ServiceError::Forbidden(_))));
    }

    #[tokio::test]
    async fn share_posts_one_card_per_group() {
        let (db, _cfg, ana, bo) = setup().await;
        let codec = InviteCodec::new("test");
        let a = groups::create_group(db.clone(), &ana, "A").await.unwrap();
        let b = groups::create_group(db.clone(), &bo, "B").await.unwrap();
        let ids = vec![a.id.clone(), b.id.clone()];

        // not yet a member of B: nothing is written
        assert!(share_title(db.clone(), &ana, &ids, MediaType::Movie, 603).await.is_err());
        assert!(last_message(db.clone(), &a.id).await.unwrap().is_none());

        let code = codec.encrypt(&b.id).unwrap();
        groups::join_group(db.clone(), &codec, &ana, &code).await.unwrap();
        let sent = share_title(db.clone(), &ana, &ids, MediaType::Series, 1399).await.unwrap();
        assert_eq!(sent.len(), 2);

        let last = last_message(db.clone(), &b.id).await.unwrap().unwrap();
        assert_eq!(last.body, MessageBody::SeriesCard(1399));
        assert_eq!(last.preview(), "Ana shared a series");

        let mine = groups::my_groups(db.clone(), &ana).await.unwrap();
        assert!(mine.iter().all(|m| m.preview() == "Ana shared a series"));
    }
}
