use movier::server::database::Database;
use sqlx::Row;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let db_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .unwrap_or_else(|| "sqlite:data/movier.db".to_string());
    println!("Connecting to {}", db_path);
    let db = Database::connect(&db_path).await?;

    println!("\n-- users --");
    let rows = sqlx::query("SELECT id, email, display_name, created_at FROM users ORDER BY created_at")
        .fetch_all(&db.pool)
        .await?;
    for r in rows.iter() {
        let id: String = r.try_get("id").unwrap_or_default();
        let email: String = r.try_get("email").unwrap_or_default();
        let name: String = r.try_get("display_name").unwrap_or_default();
        let created_at: i64 = r.try_get("created_at").unwrap_or(0);
        println!("id={} email={} name={} created_at={}", id, email, name, created_at);
    }

    println!("\n-- groups --");
    let rows = sqlx::query("SELECT id, name, created_by, created_at FROM groups")
        .fetch_all(&db.pool)
        .await?;
    for r in rows.iter() {
        let id: String = r.try_get("id").unwrap_or_default();
        let name: String = r.try_get("name").unwrap_or_default();
        let created_by: String = r.try_get("created_by").unwrap_or_default();
        let created_at: i64 = r.try_get("created_at").unwrap_or(0);
        println!("id={} name={} created_by={} created_at={}", id, name, created_by, created_at);
    }

    println!("\n-- group_members vs user_groups mirror --");
    let rows = sqlx::query(
        "SELECT gm.group_id, gm.user_id, ug.name AS mirror_name, g.name AS group_name
         FROM group_members gm
         JOIN groups g ON g.id = gm.group_id
         LEFT JOIN user_groups ug ON ug.group_id = gm.group_id AND ug.user_id = gm.user_id",
    )
    .fetch_all(&db.pool)
    .await?;
    for r in rows.iter() {
        let group_id: String = r.try_get("group_id").unwrap_or_default();
        let user_id: String = r.try_get("user_id").unwrap_or_default();
        let group_name: String = r.try_get("group_name").unwrap_or_default();
        let mirror: Option<String> = r.try_get("mirror_name").unwrap_or(None);
        let state = match mirror.as_deref() {
            None => "MISSING".to_string(),
            Some(n) if n == group_name => "ok".to_string(),
            Some(n) => format!("STALE ('{}')", n),
        };
        println!("group_id={} user_id={} mirror={}", group_id, user_id, state);
    }

    println!("\n-- messages (last 10) --");
    let rows = sqlx::query("SELECT id, group_id, sender_name, kind, body, sent_at FROM messages ORDER BY sent_at DESC, id DESC LIMIT 10")
        .fetch_all(&db.pool)
        .await?;
    for r in rows.iter() {
        let id: i64 = r.try_get("id").unwrap_or(0);
        let group_id: String = r.try_get("group_id").unwrap_or_default();
        let sender: String = r.try_get("sender_name").unwrap_or_default();
        let kind: String = r.try_get("kind").unwrap_or_default();
        let body: String = r.try_get("body").unwrap_or_default();
        let sent_at: i64 = r.try_get("sent_at").unwrap_or(0);
        println!("id={} group_id={} sender={} kind={} body_len={} sent_at={}",
                 id, group_id, sender, kind, body.len(), sent_at);
    }

    println!("\n-- watchlist --");
    let rows = sqlx::query("SELECT user_id, entry_id, title, status, watch_listed_at FROM watchlist ORDER BY user_id, watch_listed_at DESC")
        .fetch_all(&db.pool)
        .await?;
    for r in rows.iter() {
        let user_id: String = r.try_get("user_id").unwrap_or_default();
        let entry_id: String = r.try_get("entry_id").unwrap_or_default();
        let title: String = r.try_get("title").unwrap_or_default();
        let status: String = r.try_get("status").unwrap_or_default();
        println!("user_id={} id={} title={} status={}", user_id, entry_id, title, status);
    }

    Ok(())
}
