// Read-only client for the movie-metadata API
use crate::common::catalog::{self, Credits, Page, ProviderListing, Title, TitleDetails, Video};
use crate::common::models::MediaType;
use crate::server::config::ClientConfig;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use log::debug;

const IMAGE_BASE: &str = "https://image.tmdb.org/t/p";

pub const FALLBACK_MOVIE_POSTER: &str = "https://img.myloview.com/stickers/white-laptop-screen-with-hd-video-technology-icon-isolated-on-grey-background-abstract-circle-random-dots-vector-illustration-400-176057922.jpg";
pub const FALLBACK_PERSON_IMAGE: &str = "https://www.pngitem.com/pimgs/m/146-1468479_my-profile-icon-blank-profile-picture-circle-hd.png";
pub const FALLBACK_PROVIDER_IMAGE: &str = "https://www.pngitem.com/pimgs/m/287-2876223_no-profile-picture-available-hd-png-download.png";

fn image(size: &str, path: Option<&str>) -> Option<String> {
    path.filter(|p| !p.is_empty()).map(|p| format!("{}/{}{}", IMAGE_BASE, size, p))
}

pub fn image500(path: Option<&str>) -> Option<String> {
    image("w500", path)
}

pub fn image185(path: Option<&str>) -> Option<String> {
    image("w185", path)
}

pub fn poster500(path: Option<&str>) -> String {
    image500(path).unwrap_or_else(|| FALLBACK_MOVIE_POSTER.to_string())
}

pub fn poster185(path: Option<&str>) -> String {
    image185(path).unwrap_or_else(|| FALLBACK_MOVIE_POSTER.to_string())
}

pub fn provider_logo(path: Option<&str>) -> String {
    image185(path).unwrap_or_else(|| FALLBACK_PROVIDER_IMAGE.to_string())
}

pub fn person_photo(path: Option<&str>) -> String {
    image185(path).unwrap_or_else(|| FALLBACK_PERSON_IMAGE.to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum TmdbError {
    #[error("TMDB_API_KEY is not set")]
    MissingApiKey,
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Metadata API answered {status} for {path}")]
    Status { status: u16, path: String },
}

/// The browsable title lists on the home screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleList {
    Trending,
    Upcoming,
    TopRated,
}

impl TitleList {
    pub fn path(&self) -> &'static str {
        match self {
            TitleList::Trending => "trending/all/day",
            TitleList::Upcoming => "movie/upcoming",
            TitleList::TopRated => "movie/top_rated",
        }
    }
}

#[derive(Debug, Deserialize)]
struct VideoList {
    #[serde(default)]
    results: Vec<Video>,
}

#[derive(Clone)]
pub struct TmdbClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TmdbClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, TmdbError> {
        let key = config.tmdb_api_key.clone().ok_or(TmdbError::MissingApiKey)?;
        Ok(Self::new(config.tmdb_base_url.clone(), key))
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, TmdbError> {
        let url = self.endpoint(path);
        debug!("[TMDB] GET {}", url);
        let resp = self
            .http
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(query)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TmdbError::Status { status: status.as_u16(), path: path.to_string() });
        }
        Ok(resp.json::<T>().await?)
    }

    /// One page of a home-screen list. People are dropped from trending results.
    pub async fn list(&self, list: TitleList, page: u32) -> Result<Page<Title>, TmdbError> {
        let mut result: Page<Title> = self.get(list.path(), &[("page", page.to_string())]).await?;
        if list == TitleList::Trending {
            result.results = catalog::without_people(result.results);
        }
        Ok(result)
    }

    /// The first `pages` pages of a list, merged with duplicates removed.
    pub async fn list_pages(&self, list: TitleList, pages: u32) -> Result<Vec<Title>, TmdbError> {
        let mut fetched = Vec::new();
        for page in 1..=pages.max(1) {
            let p = self.list(list, page).await?;
            let last = p.total_pages;
            fetched.push(p);
            if page >= last {
                break;
            }
        }
        Ok(catalog::merge_pages(fetched))
    }

    pub async fn search(&self, query: &str, page: u32) -> Result<Page<Title>, TmdbError> {
        let mut result: Page<Title> = self
            .get("search/multi", &[("query", query.to_string()), ("page", page.to_string()), ("include_adult", "false".to_string())])
            .await?;
        result.results = catalog::without_people(result.results);
        Ok(result)
    }

    pub async fn movie_details(&self, id: i64) -> Result<TitleDetails, TmdbError> {
        self.get(&format!("movie/{}", id), &[]).await
    }

    pub async fn movie_credits(&self, id: i64) -> Result<Credits, TmdbError> {
        self.get(&format!("movie/{}/credits", id), &[]).await
    }

    pub async fn similar_movies(&self, id: i64) -> Result<Page<Title>, TmdbError> {
        self.get(&format!("movie/{}/similar", id), &[]).await
    }

    /// Official YouTube trailers and clips only.
    pub async fn movie_videos(&self, id: i64) -> Result<Vec<Video>, TmdbError> {
        let list: VideoList = self.get(&format!("movie/{}/videos", id), &[]).await?;
        Ok(catalog::official_youtube(list.results))
    }

    pub async fn movie_watch_providers(&self, id: i64) -> Result<ProviderListing, TmdbError> {
        self.get(&format!("movie/{}/watch/providers", id), &[]).await
    }

    /// Series details with credits and similar series in one request.
    pub async fn tv_details(&self, id: i64) -> Result<TitleDetails, TmdbError> {
        self.get(&format!("tv/{}", id), &[("append_to_response", "credits,similar".to_string())]).await
    }

    pub async fn tv_watch_providers(&self, id: i64) -> Result<ProviderListing, TmdbError> {
        self.get(&format!("tv/{}/watch/providers", id), &[]).await
    }

    pub async fn details(&self, media_type: MediaType, id: i64) -> Result<TitleDetails, TmdbError> {
        match media_type {
            MediaType::Movie => self.movie_details(id).await,
            MediaType::Series => self.tv_details(id).await,
        }
    }

    pub async fn watch_providers(&self, media_type: MediaType, id: i64) -> Result<ProviderListing, TmdbError> {
        match media_type {
            MediaType::Movie => self.movie_watch_providers(id).await,
            MediaType::Series => self.tv_watch_providers(id).await,
        }
    }
}
