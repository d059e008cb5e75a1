// Metadata API shapes and the client-side reshaping applied to them
use serde::{Serialize, Deserialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Title {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub first_air_date: Option<String>,
    #[serde(default)]
    pub vote_average: Option<f64>,
}

impl Title {
    /// Movies carry `title`, series carry `name`.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().or(self.name.as_deref()).unwrap_or("")
    }

    pub fn is_series(&self) -> bool {
        self.first_air_date.is_some() || self.media_type.as_deref() == Some("tv")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    #[serde(default)]
    pub total_pages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TitleDetails {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub runtime: Option<u32>,
    #[serde(default)]
    pub number_of_episodes: Option<u32>,
    #[serde(default)]
    pub vote_average: Option<f64>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    #[serde(default)]
    pub credits: Option<Credits>,
    #[serde(default)]
    pub similar: Option<Page<Title>>,
}

impl TitleDetails {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().or(self.name.as_deref()).unwrap_or("")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CastMember {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub character: Option<String>,
    #[serde(default)]
    pub profile_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Credits {
    #[serde(default)]
    pub cast: Vec<CastMember>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Video {
    pub key: String,
    pub name: String,
    pub site: String,
    #[serde(default)]
    pub official: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchProvider {
    pub provider_id: i64,
    pub provider_name: String,
    #[serde(default)]
    pub logo_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegionProviders {
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub buy: Option<Vec<WatchProvider>>,
    #[serde(default)]
    pub rent: Option<Vec<WatchProvider>>,
    #[serde(default)]
    pub flatrate: Option<Vec<WatchProvider>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderListing {
    #[serde(default)]
    pub results: HashMap<String, RegionProviders>,
}

/// Where a provider can be opened: a search URL that takes the title, or a plain landing page.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderLink {
    #[serde(default, rename = "searchURL")]
    pub search_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// One entry per distinct provider name; the first occurrence wins.
pub fn unique_providers(providers: Vec<WatchProvider>) -> Vec<WatchProvider> {
    let mut seen = HashSet::new();
    providers
        .into_iter()
        .filter(|p| seen.insert(p.provider_name.clone()))
        .collect()
}

/// Buy, then rent, then flatrate offers for `region`, deduplicated by name.
pub fn region_providers(listing: &ProviderListing, region: &str) -> Vec<WatchProvider> {
    let Some(offers) = listing.results.get(region) else {
        return Vec::new();
    };
    let merged = [&offers.buy, &offers.rent, &offers.flatrate]
        .into_iter()
        .flatten()
        .flat_map(|list| list.iter().cloned())
        .collect();
    unique_providers(merged)
}

/// Concatenates result pages, dropping titles already seen on an earlier page.
pub fn merge_pages(pages: Vec<Page<Title>>) -> Vec<Title> {
    let mut seen = HashSet::new();
    pages
        .into_iter()
        .flat_map(|p| p.results)
        .filter(|t| seen.insert(t.id))
        .collect()
}

pub fn without_people(titles: Vec<Title>) -> Vec<Title> {
    titles
        .into_iter()
        .filter(|t| t.media_type.as_deref() != Some("person"))
        .collect()
}

pub fn official_youtube(videos: Vec<Video>) -> Vec<Video> {
    videos
        .into_iter()
        .filter(|v| v.site == "YouTube" && v.official)
        .collect()
}

pub fn provider_url(link: &ProviderLink, title: &str) -> Option<String> {
    match (&link.search_url, &link.url) {
        (Some(search), _) => Some(format!("{}{}", search, encode_component(title))),
        (None, Some(url)) => Some(url.clone()),
        (None, None) => None,
    }
}

fn encode_component(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
