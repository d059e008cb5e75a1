use crate::client::services::tmdb::{self, TmdbClient, TmdbError};
use crate::common::catalog::TitleDetails;
use crate::common::models::{MediaType, Message};
use crate::common::rating::{self, RatingBadge};
use std::collections::HashMap;
use log::warn;

/// What a shared-title message renders as once its metadata is known.
#[derive(Debug, Clone, PartialEq)]
pub struct CardView {
    pub media_type: MediaType,
    pub media_id: i64,
    pub title: String,
    /// `"<n> min"` for movies, `"<n> episodes"` for series.
    pub detail: Option<String>,
    /// Vote average to two decimals.
    pub vote: Option<String>,
    pub badge: Option<RatingBadge>,
    pub poster: String,
}

impl CardView {
    pub fn from_details(media_type: MediaType, details: &TitleDetails) -> Self {
        let detail = match media_type {
            MediaType::Movie => details.runtime.map(|m| format!("{} min", m)),
            MediaType::Series => details.number_of_episodes.map(|n| format!("{} episodes", n)),
        };
        Self {
            media_type,
            media_id: details.id,
            title: details.display_title().to_string(),
            detail,
            vote: details.vote_average.map(|v| format!("{:.2}", v)),
            badge: rating::badge(details.vote_average),
            poster: tmdb::poster185(details.poster_path.as_deref()),
        }
    }

    pub fn summary(&self) -> String {
        let mut parts = vec![self.title.clone()];
        if let Some(detail) = &self.detail {
            parts.push(detail.clone());
        }
        if let Some(vote) = &self.vote {
            parts.push(format!("★ {}", vote));
        }
        parts.join(" · ")
    }
}

/// Resolves card messages on first render and remembers the result.
pub struct CardResolver {
    tmdb: TmdbClient,
    cache: HashMap<(MediaType, i64), CardView>,
}

impl CardResolver {
    pub fn new(tmdb: TmdbClient) -> Self {
        Self { tmdb, cache: HashMap::new() }
    }

    pub fn cached(&self, media_type: MediaType, media_id: i64) -> Option<&CardView> {
        self.cache.get(&(media_type, media_id))
    }

    pub async fn resolve(&mut self, media_type: MediaType, media_id: i64) -> Result<CardView, TmdbError> {
        if let Some(view) = self.cached(media_type, media_id) {
            return Ok(view.clone());
        }
        let details = self.tmdb.details(media_type, media_id).await?;
        let view = CardView::from_details(media_type, &details);
        self.cache.insert((media_type, media_id), view.clone());
        Ok(view)
    }

    /// `None` for text messages. A failed lookup is logged and also gives `None`.
    pub async fn for_message(&mut self, message: &Message) -> Option<CardView> {
        let (media_type, media_id) = message.body.shared_media()?;
        match self.resolve(media_type, media_id).await {
            Ok(view) => Some(view),
            Err(e) => {
                warn!("[CARD] Could not resolve {} {}: {}", media_type.as_str(), media_id, e);
                None
            }
        }
    }
}
