use crate::server::database::Database;
use crate::server::error::{ServiceError, ServiceResult};
use crate::server::{groups, messages, watchlist};
use serde::{Serialize, Deserialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast;
use log::debug;

/// Something a listener can watch. Rendered as `group:<id>:messages`,
/// `user:<id>:groups` or `user:<id>:watchlist`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Topic {
    GroupMessages(String),
    UserGroups(String),
    Watchlist(String),
}

impl Topic {
    /// Builds a topic from the listener protocol's `target` and `id` fields.
    pub fn from_target(target: &str, id: &str) -> Option<Self> {
        if id.is_empty() {
            return None;
        }
        match target {
            "group_messages" => Some(Topic::GroupMessages(id.to_string())),
            "my_groups" => Some(Topic::UserGroups(id.to_string())),
            "watchlist" => Some(Topic::Watchlist(id.to_string())),
            _ => None,
        }
    }

    /// Group topics need membership, user topics are self-only.
    pub async fn authorize(&self, db: Arc<Database>, user_id: &str) -> ServiceResult<()> {
        match self {
            Topic::GroupMessages(group_id) => groups::member_group(db, group_id, user_id).await.map(|_| ()),
            Topic::UserGroups(owner) | Topic::Watchlist(owner) if owner == user_id => Ok(()),
            _ => Err(ServiceError::Forbidden("You can only listen to your own data".to_string())),
        }
    }

    /// Current state of the topic as seen by `user_id`.
    pub async fn snapshot(&self, db: Arc<Database>, user_id: &str) -> ServiceResult<serde_json::Value> {
        let data = match self {
            Topic::GroupMessages(group_id) => serde_json::to_value(messages::list_messages(db, user_id, group_id, None).await?),
            Topic::UserGroups(owner) => serde_json::to_value(groups::my_groups(db, owner).await?),
            Topic::Watchlist(owner) => serde_json::to_value(watchlist::list(db, owner).await?),
        };
        Ok(data?)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::GroupMessages(id) => write!(f, "group:{}:messages", id),
            Topic::UserGroups(id) => write!(f, "user:{}:groups", id),
            Topic::Watchlist(id) => write!(f, "user:{}:watchlist", id),
        }
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.splitn(3, ':').collect();
        match parts.as_slice() {
            ["group", id, "messages"] if !id.is_empty() => Ok(Topic::GroupMessages(id.to_string())),
            ["user", id, "groups"] if !id.is_empty() => Ok(Topic::UserGroups(id.to_string())),
            ["user", id, "watchlist"] if !id.is_empty() => Ok(Topic::Watchlist(id.to_string())),
            _ => Err(format!("unknown topic '{}'", s)),
        }
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.to_string()
    }
}

impl TryFrom<String> for Topic {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A topic changed. `origin` is the id of the server instance that made the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub topic: Topic,
    pub origin: String,
}

/// In-process fan-out of store changes to listeners.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<Change>,
    instance_id: String,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, instance_id: uuid::Uuid::new_v4().to_string() }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Announces a local change.
    pub fn publish(&self, topic: Topic) {
        debug!("[FEED] {}", topic);
        let _ = self.sender.send(Change { topic, origin: self.instance_id.clone() });
    }

    pub fn publish_all(&self, topics: impl IntoIterator<Item = Topic>) {
        for topic in topics {
            self.publish(topic);
        }
    }

    /// Injects a change that happened on another instance.
    pub fn deliver(&self, change: Change) {
        let _ = self.sender.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.sender.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_render_and_parse() {
        let t = Topic::GroupMessages("g1".into());
        assert_eq!(t.to_string(), "group:g1:messages");
        assert_eq!("user:u1:watchlist".parse::<Topic>().unwrap(), Topic::Watchlist("u1".into()));
        assert_eq!("user:u1:groups".parse::<Topic>().unwrap(), Topic::UserGroups("u1".into()));
        assert!("user::groups".parse::<Topic>().is_err());
        assert!("group:g1:members".parse::<Topic>().is_err());

        assert_eq!(Topic::from_target("my_groups", "u1"), Some(Topic::UserGroups("u1".into())));
        assert_eq!(Topic::from_target("presence", "u1"), None);
    }

    #[test]
    fn change_serializes_topic_as_string() {
        let change = Change { topic: Topic::Watchlist("u1".into()), origin: "i".into() };
        let json = serde_json::to_string(&change).unwrap();
        assert_eq!(json, r#"{"topic":"user:u1:watchlist","origin":"i"}"#);
        assert_eq!(serde_json::from_str::<Change>(&json).unwrap(), change);
    }

    #[tokio::test]
    async fn subscribers_see_published_changes() {
        let feed = ChangeFeed::default();
        let mut rx = feed.subscribe();
        feed.publish(Topic::UserGroups("u1".into()));
        let change = rx.recv().await.unwrap();
        assert_eq!(change.topic, Topic::UserGroups("u1".into()));
        assert_eq!(change.origin, feed.instance_id());
    }

    #[tokio::test]
    async fn user_topics_are_self_only() {
        let db = Arc::new(Database::connect_in_memory().await.unwrap());
        assert!(Topic::Watchlist("u1".into()).authorize(db.clone(), "u1").await.is_ok());
        assert!(Topic::Watchlist("u1".into()).authorize(db.clone(), "u2").await.is_err());
        assert!(Topic::GroupMessages("nope".into()).authorize(db.clone(), "u1").await.is_err());
    }
}
