// Common models shared between client and server
use serde::{Serialize, Deserialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MediaType {
    Movie,
    Series,
}

impl MediaType {
    /// Single-letter prefix used in watchlist ids (`M603`, `T1399`).
    pub fn prefix(&self) -> char {
        match self {
            MediaType::Movie => 'M',
            MediaType::Series => 'T',
        }
    }

    pub fn from_prefix(c: char) -> Option<Self> {
        match c {
            'M' => Some(MediaType::Movie),
            'T' => Some(MediaType::Series),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "Movie",
            MediaType::Series => "Series",
        }
    }

    /// Path segment the metadata API uses for this media type.
    pub fn api_path(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Series => "tv",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "movie" | "m" => Ok(MediaType::Movie),
            "series" | "tv" | "t" => Ok(MediaType::Series),
            other => Err(format!("unknown media type '{}'", other)),
        }
    }
}

/// Deterministic watchlist document id: media-type prefix followed by the external id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WatchlistKey {
    pub media_type: MediaType,
    pub media_id: i64,
}

impl WatchlistKey {
    pub fn new(media_type: MediaType, media_id: i64) -> Self {
        Self { media_type, media_id }
    }
}

impl fmt::Display for WatchlistKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.media_type.prefix(), self.media_id)
    }
}

impl FromStr for WatchlistKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let media_type = chars
            .next()
            .and_then(MediaType::from_prefix)
            .ok_or_else(|| format!("invalid watchlist id '{}'", s))?;
        let media_id = chars
            .as_str()
            .parse::<i64>()
            .map_err(|_| format!("invalid watchlist id '{}'", s))?;
        Ok(Self { media_type, media_id })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WatchStatus {
    Watchlisted,
    Watching,
    Completed,
    Dropped,
}

impl WatchStatus {
    pub const ALL: [WatchStatus; 4] = [
        WatchStatus::Watchlisted,
        WatchStatus::Watching,
        WatchStatus::Completed,
        WatchStatus::Dropped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WatchStatus::Watchlisted => "Watchlisted",
            WatchStatus::Watching => "Watching",
            WatchStatus::Completed => "Completed",
            WatchStatus::Dropped => "Dropped",
        }
    }

    /// Every status a user can switch to from this one. There is no transition graph.
    pub fn alternatives(&self) -> Vec<WatchStatus> {
        Self::ALL.iter().copied().filter(|s| s != self).collect()
    }
}

impl fmt::Display for WatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown status '{}'", s))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    pub email: String,
    pub photo_url: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub members: Vec<String>,
    pub created_by: String,
    pub created_at: i64,
}

/// Per-user copy of a joined group, kept in step with the group record on a best-effort basis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMembership {
    pub group_id: String,
    pub name: String,
    pub joined_at: i64,
    pub last_message: Option<Message>,
}

impl GroupMembership {
    pub fn preview(&self) -> String {
        match &self.last_message {
            Some(m) => m.preview(),
            None => "No messages yet".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupInfo {
    pub group: Group,
    pub members: Vec<UserProfile>,
    pub invite_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "message")]
pub enum MessageBody {
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "movieCard")]
    MovieCard(i64),
    #[serde(rename = "tvSeriesCard")]
    SeriesCard(i64),
}

impl MessageBody {
    pub fn card(media_type: MediaType, media_id: i64) -> Self {
        match media_type {
            MediaType::Movie => MessageBody::MovieCard(media_id),
            MediaType::Series => MessageBody::SeriesCard(media_id),
        }
    }

    /// Stored `type` column value.
    pub fn kind(&self) -> &'static str {
        match self {
            MessageBody::Text(_) => "text",
            MessageBody::MovieCard(_) => "movieCard",
            MessageBody::SeriesCard(_) => "tvSeriesCard",
        }
    }

    /// Stored `body` column value: the text, or the referenced media id.
    pub fn payload(&self) -> String {
        match self {
            MessageBody::Text(t) => t.clone(),
            MessageBody::MovieCard(id) | MessageBody::SeriesCard(id) => id.to_string(),
        }
    }

    pub fn from_parts(kind: &str, payload: &str) -> Option<Self> {
        match kind {
            "text" => Some(MessageBody::Text(payload.to_string())),
            "movieCard" => payload.parse().ok().map(MessageBody::MovieCard),
            "tvSeriesCard" => payload.parse().ok().map(MessageBody::SeriesCard),
            _ => None,
        }
    }

    pub fn shared_media(&self) -> Option<(MediaType, i64)> {
        match self {
            MessageBody::Text(_) => None,
            MessageBody::MovieCard(id) => Some((MediaType::Movie, *id)),
            MessageBody::SeriesCard(id) => Some((MediaType::Series, *id)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub group_id: String,
    pub sender_id: String,
    pub sender_name: String,
    #[serde(flatten)]
    pub body: MessageBody,
    pub sent_at: i64,
}

impl Message {
    pub fn preview(&self) -> String {
        match &self.body {
            MessageBody::Text(text) => format!("{}: {}", self.sender_name, text),
            MessageBody::MovieCard(_) => format!("{} shared a movie", self.sender_name),
            MessageBody::SeriesCard(_) => format!("{} shared a series", self.sender_name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchlistEntry {
    pub id: String,
    pub media_id: i64,
    pub title: String,
    pub media_type: MediaType,
    pub status: WatchStatus,
    pub rating: Option<u8>,
    pub poster_path: Option<String>,
    pub watch_listed_at: i64,
}

/// What a client submits when bookmarking a title.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewWatchlistEntry {
    pub media_type: MediaType,
    pub media_id: i64,
    pub title: String,
    pub vote_average: Option<f64>,
    pub poster_path: Option<String>,
}

impl NewWatchlistEntry {
    pub fn key(&self) -> WatchlistKey {
        WatchlistKey::new(self.media_type, self.media_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub token: String,
}
