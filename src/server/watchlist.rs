use crate::common::models::{MediaType, NewWatchlistEntry, WatchStatus, WatchlistEntry, WatchlistKey};
use crate::common::rating;
use crate::server::database::{Database, now_millis};
use crate::server::error::{ServiceError, ServiceResult};
use std::sync::Arc;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use log::{info, warn};

const SELECT_ENTRY: &str = "SELECT entry_id, media_id, media_type, title, status, rating, poster_path, watch_listed_at FROM watchlist";

fn entry_from_row(row: &SqliteRow) -> Option<WatchlistEntry> {
    let id: String = row.get("entry_id");
    let media_type: String = row.get("media_type");
    let status: String = row.get("status");
    let (Ok(media_type), Ok(status)) = (media_type.parse::<MediaType>(), status.parse::<WatchStatus>()) else {
        warn!("[WATCHLIST] Skipping malformed entry {}", id);
        return None;
    };
    let rating: Option<i64> = row.get("rating");
    Some(WatchlistEntry {
        id,
        media_id: row.get("media_id"),
        title: row.get("title"),
        media_type,
        status,
        rating: rating.and_then(|r| u8::try_from(r).ok()),
        poster_path: row.get("poster_path"),
        watch_listed_at: row.get("watch_listed_at"),
    })
}

/// Writes the entry under its composite id. Adding a title twice overwrites the first
/// entry and resets its status to Watchlisted.
pub async fn add(db: Arc<Database>, user_id: &str, entry: &NewWatchlistEntry) -> ServiceResult<WatchlistEntry> {
    let title = entry.title.trim();
    if title.is_empty() {
        return Err(ServiceError::InvalidInput("Title cannot be empty".to_string()));
    }
    let key = entry.key();
    let saved = WatchlistEntry {
        id: key.to_string(),
        media_id: entry.media_id,
        title: title.to_string(),
        media_type: entry.media_type,
        status: WatchStatus::Watchlisted,
        rating: entry.vote_average.and_then(rating::vote_percent),
        poster_path: entry.poster_path.clone(),
        watch_listed_at: now_millis(),
    };

    sqlx::query("INSERT OR REPLACE INTO watchlist (user_id, entry_id, media_id, media_type, title, status, rating, poster_path, watch_listed_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)")
        .bind(user_id)
        .bind(&saved.id)
        .bind(saved.media_id)
        .bind(saved.media_type.as_str())
        .bind(&saved.title)
        .bind(saved.status.as_str())
        .bind(saved.rating.map(i64::from))
        .bind(&saved.poster_path)
        .bind(saved.watch_listed_at)
        .execute(&db.pool)
        .await?;
    info!("[WATCHLIST] {} added {}", user_id, saved.id);
    Ok(saved)
}

pub async fn get(db: Arc<Database>, user_id: &str, key: WatchlistKey) -> ServiceResult<Option<WatchlistEntry>> {
    let row = sqlx::query(&format!("{} WHERE user_id = ? AND entry_id = ?", SELECT_ENTRY))
        .bind(user_id)
        .bind(key.to_string())
        .fetch_optional(&db.pool)
        .await?;
    Ok(row.as_ref().and_then(entry_from_row))
}

pub async fn contains(db: Arc<Database>, user_id: &str, key: WatchlistKey) -> ServiceResult<bool> {
    Ok(sqlx::query("SELECT 1 FROM watchlist WHERE user_id = ? AND entry_id = ?")
        .bind(user_id)
        .bind(key.to_string())
        .fetch_optional(&db.pool)
        .await?
        .is_some())
}

/// Returns whether the title was present.
pub async fn remove(db: Arc<Database>, user_id: &str, key: WatchlistKey) -> ServiceResult<bool> {
    let res = sqlx::query("DELETE FROM watchlist WHERE user_id = ? AND entry_id = ?")
        .bind(user_id)
        .bind(key.to_string())
        .execute(&db.pool)
        .await?;
    let removed = res.rows_affected() > 0;
    if removed {
        info!("[WATCHLIST] {} removed {}", user_id, key);
    }
    Ok(removed)
}

/// Bookmark button: removes the title if present, otherwise adds it.
/// Returns whether the title is now on the watchlist.
pub async fn toggle(db: Arc<Database>, user_id: &str, entry: &NewWatchlistEntry) -> ServiceResult<bool> {
    if remove(db.clone(), user_id, entry.key()).await? {
        return Ok(false);
    }
    add(db, user_id, entry).await?;
    Ok(true)
}

/// Any status may be written from any other.
pub async fn set_status(db: Arc<Database>, user_id: &str, key: WatchlistKey, status: WatchStatus) -> ServiceResult<WatchlistEntry> {
    let res = sqlx::query("UPDATE watchlist SET status = ? WHERE user_id = ? AND entry_id = ?")
        .bind(status.as_str())
        .bind(user_id)
        .bind(key.to_string())
        .execute(&db.pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(ServiceError::NotFound("Watchlist entry".to_string()));
    }
    info!("[WATCHLIST] {} set {} to {}", user_id, key, status);
    get(db, user_id, key)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Watchlist entry".to_string()))
}

/// Most recently watch-listed first.
pub async fn list(db: Arc<Database>, user_id: &str) -> ServiceResult<Vec<WatchlistEntry>> {
    let rows = sqlx::query(&format!("{} WHERE user_id = ? ORDER BY watch_listed_at DESC, rowid DESC", SELECT_ENTRY))
        .bind(user_id)
        .fetch_all(&db.pool)
        .await?;
    Ok(rows.iter().filter_map(entry_from_row).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> NewWatchlistEntry {
        NewWatchlistEntry {
            media_type: MediaType::Movie,
            media_id: 603,
            title: "The Matrix".to_string(),
            vote_average: Some(8.2),
            poster_path: Some("/matrix.jpg".to_string()),
        }
    }

    fn got() -> NewWatchlistEntry {
        NewWatchlistEntry {
            media_type: MediaType::Series,
            media_id: 1399,
            title: "Game of Thrones".to_string(),
            vote_average: None,
            poster_path: None,
        }
    }

    async fn db() -> Arc<Database> {
        Arc::new(Database::connect_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn adding_twice_keeps_one_entry() {
        let db = db().await;
        let first = add(db.clone(), "u1", &matrix()).await.unwrap();
        assert_eq!(first.id, "M603");
        assert_eq!(first.rating, Some(82));
        set_status(db.clone(), "u1", matrix().key(), WatchStatus::Completed).await.unwrap();

        add(db.clone(), "u1", &matrix()).await.unwrap();
        let all = list(db.clone(), "u1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, WatchStatus::Watchlisted);
    }

    #[tokio::test]
    async fn entries_are_per_user() {
        let db = db().await;
        add(db.clone(), "u1", &matrix()).await.unwrap();
        assert!(contains(db.clone(), "u1", matrix().key()).await.unwrap());
        assert!(!contains(db.clone(), "u2", matrix().key()).await.unwrap());
        assert!(list(db.clone(), "u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_and_toggle() {
        let db = db().await;
        add(db.clone(), "u1", &matrix()).await.unwrap();
        assert!(remove(db.clone(), "u1", matrix().key()).await.unwrap());
        assert!(!remove(db.clone(), "u1", matrix().key()).await.unwrap());
        assert!(list(db.clone(), "u1").await.unwrap().is_empty());

        assert!(toggle(db.clone(), "u1", &got()).await.unwrap());
        assert_eq!(get(db.clone(), "u1", got().key()).await.unwrap().unwrap().id, "T1399");
        assert!(!toggle(db.clone(), "u1", &got()).await.unwrap());
        assert!(get(db.clone(), "u1", got().key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn any_status_can_follow_any_other() {
        let db = db().await;
        add(db.clone(), "u1", &matrix()).await.unwrap();
        for status in [WatchStatus::Completed, WatchStatus::Watchlisted, WatchStatus::Dropped, WatchStatus::Watching] {
            let e = set_status(db.clone(), "u1", matrix().key(), status).await.unwrap();
            assert_eq!(e.status, status);
        }
        let missing = set_status(db.clone(), "u1", got().key(), WatchStatus::Watching).await;
        assert!(matches!(missing, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn listing_is_newest_first() {
        let db = db().await;
        add(db.clone(), "u1", &matrix()).await.unwrap();
        add(db.clone(), "u1", &got()).await.unwrap();
        let ids: Vec<String> = list(db.clone(), "u1").await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["T1399", "M603"]);
    }
}
