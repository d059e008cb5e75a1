use crate::common::crypto::InviteCodec;
use crate::common::models::{Group, GroupInfo, GroupMembership};
use crate::server::database::{Database, now_millis};
use crate::server::error::{ServiceError, ServiceResult};
use crate::server::{messages, users};
use std::sync::Arc;
use sqlx::Row;
use log::{info, warn};

pub async fn get_group(db: Arc<Database>, group_id: &str) -> ServiceResult<Group> {
    let row = sqlx::query("SELECT id, name, created_by, created_at FROM groups WHERE id = ?")
        .bind(group_id)
        .fetch_optional(&db.pool)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Group".to_string()))?;
    let members = sqlx::query("SELECT user_id FROM group_members WHERE group_id = ? ORDER BY added_at, rowid")
        .bind(group_id)
        .fetch_all(&db.pool)
        .await?
        .iter()
        .map(|r| r.get::<String, _>("user_id"))
        .collect();
    Ok(Group {
        id: row.get("id"),
        name: row.get("name"),
        members,
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
    })
}

pub async fn is_member(db: Arc<Database>, group_id: &str, user_id: &str) -> ServiceResult<bool> {
    Ok(sqlx::query("SELECT 1 FROM group_members WHERE group_id = ? AND user_id = ?")
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&db.pool)
        .await?
        .is_some())
}

/// Loads the group and checks that `user_id` belongs to it.
pub async fn member_group(db: Arc<Database>, group_id: &str, user_id: &str) -> ServiceResult<Group> {
    let group = get_group(db, group_id).await?;
    if !group.members.iter().any(|m| m == user_id) {
        return Err(ServiceError::not_member());
    }
    Ok(group)
}

async fn owned_group(db: Arc<Database>, group_id: &str, user_id: &str) -> ServiceResult<Group> {
    let group = get_group(db, group_id).await?;
    if group.created_by != user_id {
        return Err(ServiceError::not_owner());
    }
    Ok(group)
}

async fn write_mirror(db: &Database, user_id: &str, group_id: &str, name: &str, joined_at: i64) -> ServiceResult<()> {
    sqlx::query("INSERT INTO user_groups (user_id, group_id, name, joined_at) VALUES (?, ?, ?, ?)
                 ON CONFLICT(user_id, group_id) DO UPDATE SET name = excluded.name, joined_at = excluded.joined_at")
        .bind(user_id)
        .bind(group_id)
        .bind(name)
        .bind(joined_at)
        .execute(&db.pool)
        .await?;
    Ok(())
}

/// Writes the group record, then the creator's mirror as a second, separate write.
pub async fn create_group(db: Arc<Database>, user_id: &str, group_name: &str) -> ServiceResult<Group> {
    let name = group_name.trim();
    if name.is_empty() {
        return Err(ServiceError::InvalidInput("Please specify a group name!".to_string()));
    }
    info!("[GROUPS] Create group '{}' by user {}", name, user_id);

    let group_id = uuid::Uuid::new_v4().to_string();
    let created_at = now_millis();

    let mut tx = db.pool.begin().await?;
    sqlx::query("INSERT INTO groups (id, name, created_by, created_at) VALUES (?, ?, ?, ?)")
        .bind(&group_id)
        .bind(name)
        .bind(user_id)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO group_members (group_id, user_id, added_at) VALUES (?, ?, ?)")
        .bind(&group_id)
        .bind(user_id)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    write_mirror(&db, user_id, &group_id, name, created_at).await?;

    info!("[GROUPS] Group '{}' created with id {}", name, group_id);
    Ok(Group {
        id: group_id,
        name: name.to_string(),
        members: vec![user_id.to_string()],
        created_by: user_id.to_string(),
        created_at,
    })
}

/// Decrypts the invite code, adds the user to the member set and writes their mirror.
pub async fn join_group(db: Arc<Database>, codec: &InviteCodec, user_id: &str, invite_code: &str) -> ServiceResult<GroupMembership> {
    if invite_code.trim().is_empty() {
        return Err(ServiceError::InvalidInput("Please enter a group invite code!".to_string()));
    }
    let group_id = codec.decrypt(invite_code).map_err(|_| ServiceError::InvalidInviteCode)?;
    let group = match get_group(db.clone(), &group_id).await {
        Ok(g) => g,
        Err(ServiceError::NotFound(_)) => return Err(ServiceError::InvalidInviteCode),
        Err(e) => return Err(e),
    };
    info!("[GROUPS] User {} joins group {} via invite code", user_id, group.id);

    let joined_at = now_millis();
    sqlx::query("INSERT OR IGNORE INTO group_members (group_id, user_id, added_at) VALUES (?, ?, ?)")
        .bind(&group.id)
        .bind(user_id)
        .bind(joined_at)
        .execute(&db.pool)
        .await?;

    write_mirror(&db, user_id, &group.id, &group.name, joined_at).await?;

    let last_message = messages::last_message(db.clone(), &group.id).await?;
    Ok(GroupMembership {
        group_id: group.id,
        name: group.name,
        joined_at,
        last_message,
    })
}

pub async fn invite_code(db: Arc<Database>, codec: &InviteCodec, user_id: &str, group_id: &str) -> ServiceResult<String> {
    let group = member_group(db, group_id, user_id).await?;
    Ok(codec.encrypt(&group.id)?)
}

pub async fn group_info(db: Arc<Database>, codec: &InviteCodec, user_id: &str, group_id: &str) -> ServiceResult<GroupInfo> {
    let group = member_group(db.clone(), group_id, user_id).await?;
    let members = users::get_profiles(db.clone(), &group.members).await?;
    let invite_code = codec.encrypt(&group.id)?;
    Ok(GroupInfo { group, members, invite_code })
}

/// Renames the group and every member's mirror in one transaction.
///
/// A member without a mirror row is skipped with a warning. Returns the members whose
/// mirror was updated.
pub async fn rename_group(db: Arc<Database>, user_id: &str, group_id: &str, new_name: &str) -> ServiceResult<Vec<String>> {
    let name = new_name.trim();
    if name.is_empty() {
        return Err(ServiceError::InvalidInput("Please specify a group name!".to_string()));
    }
    let group = owned_group(db.clone(), group_id, user_id).await?;
    if group.name == name {
        return Ok(Vec::new());
    }
    info!("[GROUPS] Rename group {} '{}' -> '{}'", group.id, group.name, name);

    let mut tx = db.pool.begin().await?;
    sqlx::query("UPDATE groups SET name = ? WHERE id = ?")
        .bind(name)
        .bind(&group.id)
        .execute(&mut *tx)
        .await?;

    let mut updated = Vec::with_capacity(group.members.len());
    for member in &group.members {
        let res = sqlx::query("UPDATE user_groups SET name = ? WHERE user_id = ? AND group_id = ?")
            .bind(name)
            .bind(member)
            .bind(&group.id)
            .execute(&mut *tx)
            .await?;
        if res.rows_affected() == 0 {
            warn!("[GROUPS] Member {} of group {} has no mirror to rename", member, group.id);
        } else {
            updated.push(member.clone());
        }
    }
    tx.commit().await?;
    Ok(updated)
}

/// Deletes every member's mirror, the member list, the messages and the group.
/// Returns the former members.
pub async fn delete_group(db: Arc<Database>, user_id: &str, group_id: &str) -> ServiceResult<Vec<String>> {
    let group = owned_group(db.clone(), group_id, user_id).await?;
    info!("[GROUPS] Delete group {} by {}", group.id, user_id);

    let mut tx = db.pool.begin().await?;
    for member in &group.members {
        sqlx::query("DELETE FROM user_groups WHERE user_id = ? AND group_id = ?")
            .bind(member)
            .bind(&group.id)
            .execute(&mut *tx)
            .await?;
    }
    sqlx::query("DELETE FROM group_members WHERE group_id = ?")
        .bind(&group.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM messages WHERE group_id = ?")
        .bind(&group.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM groups WHERE id = ?")
        .bind(&group.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(group.members)
}

/// Removes the user from the member list and deletes their mirror. The owner has to
/// delete the group instead.
pub async fn leave_group(db: Arc<Database>, user_id: &str, group_id: &str) -> ServiceResult<()> {
    let group = member_group(db.clone(), group_id, user_id).await?;
    if group.created_by == user_id {
        return Err(ServiceError::Forbidden("The group owner cannot leave; delete the group instead".to_string()));
    }
    info!("[GROUPS] User {} leaves group {}", user_id, group.id);

    let mut tx = db.pool.begin().await?;
    sqlx::query("DELETE FROM group_members WHERE group_id = ? AND user_id = ?")
        .bind(&group.id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM user_groups WHERE user_id = ? AND group_id = ?")
        .bind(user_id)
        .bind(&group.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// The user's mirror rows, most recently joined first, each with the group's last message.
pub async fn my_groups(db: Arc<Database>, user_id: &str) -> ServiceResult<Vec<GroupMembership>> {
    let rows = sqlx::query("SELECT group_id, name, joined_at FROM user_groups WHERE user_id = ? ORDER BY joined_at DESC, rowid DESC")
        .bind(user_id)
        .fetch_all(&db.pool)
        .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let group_id: String = row.get("group_id");
        let last_message = messages::last_message(db.clone(), &group_id).await?;
        out.push(GroupMembership {
            group_id,
            name: row.get("name"),
            joined_at: row.get("joined_at"),
            last_message,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{auth, config::ServerConfig};

    struct Fixture {
        db: Arc<Database>,
        codec: InviteCodec,
        owner: String,
        guest: String,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(Database::connect_in_memory().await.unwrap());
        let cfg = ServerConfig::default();
        let owner = auth::sign_up(db.clone(), "owner@x.io", "secret1", "Owner", &cfg).await.unwrap().user_id;
        let guest = auth::sign_up(db.clone(), "guest@x.io", "secret1", "Guest", &cfg).await.unwrap().user_id;
        Fixture { db, codec: InviteCodec::new("test"), owner, guest }
    }

    async fn mirror_names(db: &Arc<Database>, group_id: &str) -> Vec<String> {
        sqlx::query("SELECT name FROM user_groups WHERE group_id = ? ORDER BY user_id")
            .bind(group_id)
            .fetch_all(&db.pool)
            .await
            .unwrap()
            .iter()
            .map(|r| r.get("name"))
            .collect()
    }

    #[tokio::test]
    async fn create_writes_group_and_mirror() {
        let f = fixture().await;
        assert!(matches!(create_group(f.db.clone(), &f.owner, "   ").await, Err(ServiceError::InvalidInput(_))));

        let g = create_group(f.db.clone(), &f.owner, " Weekend films ").await.unwrap();
        assert_eq!(g.name, "Weekend films");
        assert_eq!(get_group(f.db.clone(), &g.id).await.unwrap().members, vec![f.owner.clone()]);

        let mine = my_groups(f.db.clone(), &f.owner).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].group_id, g.id);
        assert_eq!(mine[0].preview(), "No messages yet");
    }

    #[tokio::test]
    async fn join_via_invite_code_is_idempotent() {
        let f = fixture().await;
        let g = create_group(f.db.clone(), &f.owner, "Films").await.unwrap();
        let code = invite_code(f.db.clone(), &f.codec, &f.owner, &g.id).await.unwrap();

        let m = join_group(f.db.clone(), &f.codec, &f.guest, &code).await.unwrap();
        assert_eq!(m.name, "Films");
        join_group(f.db.clone(), &f.codec, &f.guest, &code).await.unwrap();

        let group = get_group(f.db.clone(), &g.id).await.unwrap();
        assert_eq!(group.members, vec![f.owner.clone(), f.guest.clone()]);
        assert_eq!(my_groups(f.db.clone(), &f.guest).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bad_invite_codes_are_rejected() {
        let f = fixture().await;
        assert!(matches!(join_group(f.db.clone(), &f.codec, &f.guest, "").await, Err(ServiceError::InvalidInput(_))));
        assert!(matches!(join_group(f.db.clone(), &f.codec, &f.guest, "garbage").await, Err(ServiceError::InvalidInviteCode)));

        // well-formed code for a group that does not exist
        let dangling = f.codec.encrypt("no-such-group").unwrap();
        assert!(matches!(join_group(f.db.clone(), &f.codec, &f.guest, &dangling).await, Err(ServiceError::InvalidInviteCode)));
    }

    #[tokio::test]
    async fn rename_updates_every_mirror() {
        let f = fixture().await;
        let g = create_group(f.db.clone(), &f.owner, "Films").await.unwrap();
        let code = f.codec.encrypt(&g.id).unwrap();
        join_group(f.db.clone(), &f.codec, &f.guest, &code).await.unwrap();

        assert!(matches!(rename_group(f.db.clone(), &f.guest, &g.id, "Mine").await, Err(ServiceError::Forbidden(_))));
        let touched = rename_group(f.db.clone(), &f.owner, &g.id, "Cinema Club").await.unwrap();
        assert_eq!(touched.len(), 2);
        assert_eq!(get_group(f.db.clone(), &g.id).await.unwrap().name, "Cinema Club");
        assert_eq!(mirror_names(&f.db, &g.id).await, vec!["Cinema Club", "Cinema Club"]);

        assert!(rename_group(f.db.clone(), &f.owner, &g.id, "Cinema Club").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rename_skips_missing_mirror() {
        let f = fixture().await;
        let g = create_group(f.db.clone(), &f.owner, "Films").await.unwrap();
        let code = f.codec.encrypt(&g.id).unwrap();
        join_group(f.db.clone(), &f.codec, &f.guest, &code).await.unwrap();
        sqlx::query("DELETE FROM user_groups WHERE user_id = ?").bind(&f.guest).execute(&f.db.pool).await.unwrap();

        let touched = rename_group(f.db.clone(), &f.owner, &g.id, "Renamed").await.unwrap();
        assert_eq!(touched, vec![f.owner.clone()]);
    }

    #[tokio::test]
    async fn delete_removes_group_and_mirrors() {
        let f = fixture().await;
        let g = create_group(f.db.clone(), &f.owner, "Films").await.unwrap();
        let code = f.codec.encrypt(&g.id).unwrap();
        join_group(f.db.clone(), &f.codec, &f.guest, &code).await.unwrap();

        assert!(delete_group(f.db.clone(), &f.guest, &g.id).await.is_err());
        let former = delete_group(f.db.clone(), &f.owner, &g.id).await.unwrap();
        assert_eq!(former.len(), 2);
        assert!(matches!(get_group(f.db.clone(), &g.id).await, Err(ServiceError::NotFound(_))));
        assert!(mirror_names(&f.db, &g.id).await.is_empty());
        assert!(my_groups(f.db.clone(), &f.guest).await.unwrap().is_empty());
        assert!(matches!(join_group(f.db.clone(), &f.codec, &f.guest, &code).await, Err(ServiceError::InvalidInviteCode)));
    }

    #[tokio::test]
    async fn members_leave_but_owner_cannot() {
        let f = fixture().await;
        let g = create_group(f.db.clone(), &f.owner, "Films").await.unwrap();
        let code = f.codec.encrypt(&g.id).unwrap();
        join_group(f.db.clone(), &f.codec, &f.guest, &code).await.unwrap();

        assert!(matches!(leave_group(f.db.clone(), &f.owner, &g.id).await, Err(ServiceError::Forbidden(_))));
        leave_group(f.db.clone(), &f.guest, &g.id).await.unwrap();
        assert!(!is_member(f.db.clone(), &g.id, &f.guest).await.unwrap());
        assert!(my_groups(f.db.clone(), &f.guest).await.unwrap().is_empty());
        assert!(matches!(group_info(f.db.clone(), &f.codec, &f.guest, &g.id).await, Err(ServiceError::Forbidden(_))));
    }

    #[tokio::test]
    async fn group_info_lists_member_profiles() {
        let f = fixture().await;
        let g = create_group(f.db.clone(), &f.owner, "Films").await.unwrap();
        let code = f.codec.encrypt(&g.id).unwrap();
        join_group(f.db.clone(), &f.codec, &f.guest, &code).await.unwrap();

        let info = group_info(f.db.clone(), &f.codec, &f.guest, &g.id).await.unwrap();
        let names: Vec<&str> = info.members.iter().map(|p| p.display_name.as_str()).collect();
        assert_eq!(names, vec!["Owner", "Guest"]);
        assert_eq!(f.codec.decrypt(&info.invite_code).unwrap(), g.id);
    }

    #[tokio::test]
    async fn my_groups_most_recent_first() {
        let f = fixture().await;
        let a = create_group(f.db.clone(), &f.owner, "A").await.unwrap();
        let b = create_group(f.db.clone(), &f.owner, "B").await.unwrap();
        let ids: Vec<String> = my_groups(f.db.clone(), &f.owner).await.unwrap().into_iter().map(|m| m.group_id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }
}
