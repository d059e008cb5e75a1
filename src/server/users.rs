use crate::common::models::UserProfile;
use crate::server::database::Database;
use crate::server::error::{ServiceError, ServiceResult};
use std::sync::Arc;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use log::{info, warn};

fn profile_from_row(row: &SqliteRow) -> UserProfile {
    UserProfile {
        id: row.get("id"),
        display_name: row.get("display_name"),
        email: row.get("email"),
        photo_url: row.get("photo_url"),
        created_at: row.get("created_at"),
    }
}

pub async fn get_profile(db: Arc<Database>, user_id: &str) -> ServiceResult<UserProfile> {
    let row = sqlx::query("SELECT id, display_name, email, photo_url, created_at FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&db.pool)
        .await?;
    row.as_ref()
        .map(profile_from_row)
        .ok_or_else(|| ServiceError::NotFound("User".to_string()))
}

/// Profiles for the given ids, in the given order. Unknown ids are skipped.
pub async fn get_profiles(db: Arc<Database>, user_ids: &[String]) -> ServiceResult<Vec<UserProfile>> {
    let mut out = Vec::with_capacity(user_ids.len());
    for id in user_ids {
        match get_profile(db.clone(), id).await {
            Ok(p) => out.push(p),
            Err(ServiceError::NotFound(_)) => warn!("[USERS] Member {} has no profile", id),
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

/// Updates the profile and, when the display name changes, rewrites the sender name on
/// every message the user sent in the groups they belong to.
///
/// The rewrite goes one group at a time. A failure part-way leaves earlier groups renamed.
/// Returns the number of messages rewritten.
pub async fn update_profile(db: Arc<Database>, user_id: &str, display_name: Option<&str>, photo_url: Option<&str>) -> ServiceResult<u64> {
    let current = get_profile(db.clone(), user_id).await?;

    if let Some(url) = photo_url {
        let url = url.trim();
        let value = if url.is_empty() { None } else { Some(url) };
        sqlx::query("UPDATE users SET photo_url = ? WHERE id = ?")
            .bind(value)
            .bind(user_id)
            .execute(&db.pool)
            .await?;
        info!("[USERS] Updated photo for {}", user_id);
    }

    let Some(name) = display_name.map(str::trim) else {
        return Ok(0);
    };
    if name.is_empty() {
        return Err(ServiceError::InvalidInput("Display name cannot be empty".to_string()));
    }
    if name == current.display_name {
        return Ok(0);
    }

    sqlx::query("UPDATE users SET display_name = ? WHERE id = ?")
        .bind(name)
        .bind(user_id)
        .execute(&db.pool)
        .await?;
    info!("[USERS] {} renamed '{}' -> '{}'", user_id, current.display_name, name);

    let group_ids = joined_group_ids(db.clone(), user_id).await?;
    let mut rewritten = 0;
    for group_id in group_ids {
        let res = sqlx::query("UPDATE messages SET sender_name = ? WHERE group_id = ? AND sender_id = ?")
            .bind(name)
            .bind(&group_id)
            .bind(user_id)
            .execute(&db.pool)
            .await?;
        rewritten += res.rows_affected();
    }
    info!("[USERS] Rewrote sender name on {} messages for {}", rewritten, user_id);
    Ok(rewritten)
}

/// Group ids from the user's membership mirror.
pub async fn joined_group_ids(db: Arc<Database>, user_id: &str) -> ServiceResult<Vec<String>> {
    Ok(sqlx::query("SELECT group_id FROM user_groups WHERE user_id = ?")
        .bind(user_id)
        .fetch_all(&db.pool)
        .await?
        .iter()
        .map(|r| r.get("group_id"))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{auth, config::ServerConfig, groups, messages};

    #[tokio::test]
    async fn rename_rewrites_sender_names_in_joined_groups() {
        let db = Arc::new(Database::connect_in_memory().await.unwrap());
        let cfg = ServerConfig::default();
        let ana = auth::sign_up(db.clone(), "ana@x.io", "secret1", "Ana", &cfg).await.unwrap().user_id;
        let group = groups::create_group(db.clone(), &ana, "Films").await.unwrap();
        messages::send_message(db.clone(), &ana, &group.id, "first", &cfg).await.unwrap();
        messages::send_message(db.clone(), &ana, &group.id, "second", &cfg).await.unwrap();

        let n = update_profile(db.clone(), &ana, Some("Ana B"), None).await.unwrap();
        assert_eq!(n, 2);
        let msgs = messages::list_messages(db.clone(), &ana, &group.id, None).await.unwrap();
        assert!(msgs.iter().all(|m| m.sender_name == "Ana B"));
        assert_eq!(get_profile(db.clone(), &ana).await.unwrap().display_name, "Ana B");

        // unchanged name is a no-op
        assert_eq!(update_profile(db.clone(), &ana, Some("Ana B"), None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn photo_update_and_validation() {
        let db = Arc::new(Database::connect_in_memory().await.unwrap());
        let cfg = ServerConfig::default();
        let ana = auth::sign_up(db.clone(), "ana@x.io", "secret1", "Ana", &cfg).await.unwrap().user_id;

        update_profile(db.clone(), &ana, None, Some("https://img.test/a.png")).await.unwrap();
        let p = get_profile(db.clone(), &ana).await.unwrap();
        assert_eq!(p.photo_url.as_deref(), Some("https://img.test/a.png"));
        assert_eq!(p.email, "ana@x.io");

        assert!(matches!(update_profile(db.clone(), &ana, Some(" "), None).await, Err(ServiceError::InvalidInput(_))));
        assert!(matches!(get_profile(db.clone(), "ghost").await, Err(ServiceError::NotFound(_))));
    }
}
