use movier::client::services::chat_service::{parse_json, parse_reply, parse_session};
use movier::common::models::{Group, GroupInfo, GroupMembership, Message, MessageBody, Session, WatchStatus, WatchlistEntry};
use movier::server::config::ServerConfig;
use movier::server::connection::Server;
use movier::server::database::Database;
use movier::server::feed::{ChangeFeed, Topic};
use std::sync::Arc;

async fn server() -> Server {
    let db = Arc::new(Database::connect_in_memory().await.unwrap());
    Server::new(db, ServerConfig::default(), ChangeFeed::default())
}

async fn call(server: &Server, line: &str) -> String {
    let mut parts = line.split_whitespace();
    let cmd = parts.next().unwrap();
    let args: Vec<&str> = parts.collect();
    server.handle_command(cmd, &args).await
}

async fn signup(server: &Server, email: &str, name: &str) -> Session {
    parse_session(&call(server, &format!("/signup {} secret1 {}", email, name)).await).unwrap()
}

#[tokio::test]
async fn signup_login_logout() {
    let s = server().await;
    let ana = signup(&s, "ana@x.io", "Ana Lopez").await;

    let again = call(&s, "/signup ana@x.io secret1 Ana").await;
    assert_eq!(again, "ERR: The email address is already in use.");

    let wrong = call(&s, "/login ana@x.io nope123").await;
    assert_eq!(wrong, "ERR: The password you entered is incorrect.");

    let login = parse_session(&call(&s, "/login ana@x.io secret1").await).unwrap();
    assert_eq!(login.user_id, ana.user_id);
    assert_ne!(login.token, ana.token);

    let who = call(&s, &format!("/validate_session {}", login.token)).await;
    assert_eq!(parse_reply(&who).unwrap(), ana.user_id);

    assert_eq!(call(&s, &format!("/logout {}", login.token)).await, "OK: Logged out");
    assert!(call(&s, &format!("/my_groups {}", login.token)).await.starts_with("ERR:"));
    // the other session is unaffected
    assert!(call(&s, &format!("/my_groups {}", ana.token)).await.starts_with("OK:"));
}

#[tokio::test]
async fn group_lifecycle_over_the_protocol() {
    let s = server().await;
    let ana = signup(&s, "ana@x.io", "Ana").await;
    let bo = signup(&s, "bo@x.io", "Bo").await;

    let group: Group = parse_json(&call(&s, &format!("/create_group {} Friday Films", ana.token)).await).unwrap();
    assert_eq!(group.name, "Friday Films");

    let code = call(&s, &format!("/invite_code {} {}", ana.token, group.id)).await;
    let code = parse_reply(&code).unwrap().to_string();

    assert_eq!(call(&s, &format!("/join_group {} garbage", bo.token)).await, "ERR: Invalid invite code!");
    let joined: GroupMembership = parse_json(&call(&s, &format!("/join_group {} {}", bo.token, code)).await).unwrap();
    assert_eq!(joined.group_id, group.id);

    let info: GroupInfo = parse_json(&call(&s, &format!("/group_info {} {}", bo.token, group.id)).await).unwrap();
    assert_eq!(info.members.len(), 2);

    // only the owner may rename
    assert!(call(&s, &format!("/rename_group {} {} Nope", bo.token, group.id)).await.starts_with("ERR:"));
    let renamed = call(&s, &format!("/rename_group {} {} Saturday Films", ana.token, group.id)).await;
    assert_eq!(renamed, "OK: Group renamed (2 members updated)");

    let mine: Vec<GroupMembership> = parse_json(&call(&s, &format!("/my_groups {}", bo.token)).await).unwrap();
    assert_eq!(mine[0].name, "Saturday Films");

    assert!(call(&s, &format!("/leave_group {} {}", ana.token, group.id)).await.starts_with("ERR:"));
    assert_eq!(call(&s, &format!("/leave_group {} {}", bo.token, group.id)).await, "OK: Left group");

    assert_eq!(call(&s, &format!("/delete_group {} {}", ana.token, group.id)).await, "OK: Group deleted");
    let mine: Vec<GroupMembership> = parse_json(&call(&s, &format!("/my_groups {}", ana.token)).await).unwrap();
    assert!(mine.is_empty());
}

#[tokio::test]
async fn messages_and_shares_publish_changes() {
    let s = server().await;
    let ana = signup(&s, "ana@x.io", "Ana").await;
    let group: Group = parse_json(&call(&s, &format!("/create_group {} Films", ana.token)).await).unwrap();
    let mut changes = s.feed.subscribe();

    let sent: Message = parse_json(&call(&s, &format!("/send {} {} hello there", ana.token, group.id)).await).unwrap();
    assert_eq!(sent.body, MessageBody::Text("hello there".into()));
    assert_eq!(changes.recv().await.unwrap().topic, Topic::GroupMessages(group.id.clone()));
    assert_eq!(changes.recv().await.unwrap().topic, Topic::UserGroups(ana.user_id.clone()));

    let shared = call(&s, &format!("/share {} movie 603 {}", ana.token, group.id)).await;
    assert_eq!(shared, "OK: Shared to 1 groups");

    let listed: Vec<Message> = parse_json(&call(&s, &format!("/messages {} {}", ana.token, group.id)).await).unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].body, MessageBody::MovieCard(603));
    assert_eq!(listed[0].preview(), "Ana shared a movie");

    let limited: Vec<Message> = parse_json(&call(&s, &format!("/messages {} {} 1", ana.token, group.id)).await).unwrap();
    assert_eq!(limited.len(), 1);

    let renamed = call(&s, &format!("/update_name {} Ana Maria", ana.token)).await;
    assert_eq!(renamed, "OK: Name updated (2 messages rewritten)");
    let listed: Vec<Message> = parse_json(&call(&s, &format!("/messages {} {}", ana.token, group.id)).await).unwrap();
    assert!(listed.iter().all(|m| m.sender_name == "Ana Maria"));
}

#[tokio::test]
async fn outsiders_cannot_read_or_post() {
    let s = server().await;
    let ana = signup(&s, "ana@x.io", "Ana").await;
    let eve = signup(&s, "eve@x.io", "Eve").await;
    let group: Group = parse_json(&call(&s, &format!("/create_group {} Films", ana.token)).await).unwrap();

    assert!(call(&s, &format!("/send {} {} hi", eve.token, group.id)).await.starts_with("ERR:"));
    assert!(call(&s, &format!("/messages {} {}", eve.token, group.id)).await.starts_with("ERR:"));
    assert!(call(&s, &format!("/share {} tv 1399 {}", eve.token, group.id)).await.starts_with("ERR:"));
}

#[tokio::test]
async fn watchlist_commands() {
    let s = server().await;
    let ana = signup(&s, "ana@x.io", "Ana").await;

    let added: WatchlistEntry =
        parse_json(&call(&s, &format!("/watchlist_add {} movie 603 8.2 /m.jpg The Matrix", ana.token)).await).unwrap();
    assert_eq!(added.id, "M603");
    assert_eq!(added.rating, Some(82));
    assert_eq!(added.status, WatchStatus::Watchlisted);

    let updated: WatchlistEntry =
        parse_json(&call(&s, &format!("/watchlist_status {} M603 Watching", ana.token)).await).unwrap();
    assert_eq!(updated.status, WatchStatus::Watching);
    assert!(call(&s, &format!("/watchlist_status {} T1 Watching", ana.token)).await.starts_with("ERR:"));

    let toggled = call(&s, &format!("/watchlist_toggle {} tv 1399 - - Game of Thrones", ana.token)).await;
    assert_eq!(toggled, "OK: Added to watchlist");
    let list: Vec<WatchlistEntry> = parse_json(&call(&s, &format!("/watchlist {}", ana.token)).await).unwrap();
    assert_eq!(list.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["T1399", "M603"]);

    let toggled = call(&s, &format!("/watchlist_toggle {} tv 1399 - - Game of Thrones", ana.token)).await;
    assert_eq!(toggled, "OK: Removed from watchlist");

    assert_eq!(call(&s, &format!("/watchlist_remove {} M603", ana.token)).await, "OK: Removed from watchlist");
    assert_eq!(call(&s, &format!("/watchlist_remove {} M603", ana.token)).await, "OK: Not on watchlist");
    assert!(call(&s, &format!("/watchlist_get {} M603", ana.token)).await.starts_with("ERR:"));
}

#[tokio::test]
async fn unknown_commands_are_rejected() {
    let s = server().await;
    assert!(call(&s, "/frobnicate").await.starts_with("ERR: Unknown command"));
    assert!(call(&s, "/login only-one-arg").await.starts_with("ERR: Unknown command"));
    assert!(call(&s, "/help").await.starts_with("OK: Commands:"));
}
