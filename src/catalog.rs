use crate::models::MediaType;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::env;
use thiserror::Error;

const TMDB_BASE: &str = "https://api.themoviedb.org/3";
const IMAGE_BASE: &str = "https://image.tmdb.org/t/p/original";
const LANG: &str = "es-ES";

/// Any transport failure or non-success response from the catalog service,
/// tagged with the operation that was attempted. Never retried.
#[derive(Debug, Error)]
#[error("catalog request failed: {operation}")]
pub struct CatalogError {
    pub operation: &'static str,
    #[source]
    source: anyhow::Error,
}

impl CatalogError {
    pub fn new(operation: &'static str, source: anyhow::Error) -> Self {
        Self { operation, source }
    }
}

/// A raw catalog record, validated into named optional fields at this
/// boundary. `media_type` is kept as the service's string because
/// multi-search can return kinds we do not model (e.g. people).
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogRecord {
    pub id: i32,
    pub title: Option<String>,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub media_type: Option<String>,
}

impl CatalogRecord {
    pub fn parsed_media_type(&self) -> Option<MediaType> {
        match self.media_type.as_deref() {
            Some("movie") => Some(MediaType::Movie),
            Some("tv") => Some(MediaType::Series),
            _ => None,
        }
    }

    /// Convert into a view-layer item. Endpoints scoped to one media kind
    /// (top-rated, upcoming, airing-today) do not tag their records, so the
    /// caller supplies the kind; a tag on the record itself wins.
    pub fn into_item(self, assumed: MediaType) -> crate::models::MediaItem {
        let media_type = self.parsed_media_type().unwrap_or(assumed);
        crate::models::MediaItem {
            id: self.id,
            media_type,
            title: self.title,
            name: self.name,
            overview: self.overview,
            poster_path: self.poster_path,
            backdrop_path: self.backdrop_path,
            trailer_key: None,
        }
    }
}

/// One candidate promotional video for a catalog item.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoEntry {
    pub key: String,
    pub site: String,
    #[serde(rename = "type")]
    pub video_type: String,
}

#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn trending_movies(&self) -> Result<Vec<CatalogRecord>, CatalogError>;
    async fn trending_series(&self) -> Result<Vec<CatalogRecord>, CatalogError>;
    async fn top_rated_movies(&self) -> Result<Vec<CatalogRecord>, CatalogError>;
    async fn top_rated_series(&self) -> Result<Vec<CatalogRecord>, CatalogError>;
    async fn upcoming_movies(&self) -> Result<Vec<CatalogRecord>, CatalogError>;
    async fn airing_today_series(&self) -> Result<Vec<CatalogRecord>, CatalogError>;
    async fn search_multi(&self, query: &str) -> Result<Vec<CatalogRecord>, CatalogError>;
    async fn videos(
        &self,
        media_type: MediaType,
        id: i32,
    ) -> Result<Vec<VideoEntry>, CatalogError>;
}

#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    api_key: String,
}

impl TmdbClient {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = env::var("TMDB_API_KEY").context("TMDB_API_KEY not set")?;
        Ok(Self {
            client: Client::new(),
            api_key,
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> anyhow::Result<T> {
        let res = self
            .client
            .get(url)
            .send()
            .await
            .context("request failed")?;
        let status = res.status();
        let text = res.text().await.context("reading body failed")?;
        if !status.is_success() {
            return Err(anyhow!("{} -> {}", url, text));
        }
        let parsed: T = serde_json::from_str(&text).context("JSON parse failed")?;
        Ok(parsed)
    }

    async fn fetch_results(
        &self,
        operation: &'static str,
        url: String,
    ) -> Result<Vec<CatalogRecord>, CatalogError> {
        let data: ListResponse = self
            .get_json(&url)
            .await
            .map_err(|source| CatalogError { operation, source })?;
        Ok(data.results)
    }
}

#[async_trait]
impl CatalogApi for TmdbClient {
    async fn trending_movies(&self) -> Result<Vec<CatalogRecord>, CatalogError> {
        let url = format!(
            "{TMDB_BASE}/trending/movie/week?api_key={}&language={LANG}",
            self.api_key
        );
        self.fetch_results("trending_movies", url).await
    }

    async fn trending_series(&self) -> Result<Vec<CatalogRecord>, CatalogError> {
        let url = format!(
            "{TMDB_BASE}/trending/tv/week?api_key={}&language={LANG}",
            self.api_key
        );
        self.fetch_results("trending_series", url).await
    }

    async fn top_rated_movies(&self) -> Result<Vec<CatalogRecord>, CatalogError> {
        let url = format!(
            "{TMDB_BASE}/movie/top_rated?api_key={}&language={LANG}",
            self.api_key
        );
        self.fetch_results("top_rated_movies", url).await
    }

    async fn top_rated_series(&self) -> Result<Vec<CatalogRecord>, CatalogError> {
        let url = format!(
            "{TMDB_BASE}/tv/top_rated?api_key={}&language={LANG}",
            self.api_key
        );
        self.fetch_results("top_rated_series", url).await
    }

    async fn upcoming_movies(&self) -> Result<Vec<CatalogRecord>, CatalogError> {
        let url = format!(
            "{TMDB_BASE}/movie/upcoming?api_key={}&language={LANG}",
            self.api_key
        );
        self.fetch_results("upcoming_movies", url).await
    }

    async fn airing_today_series(&self) -> Result<Vec<CatalogRecord>, CatalogError> {
        let url = format!(
            "{TMDB_BASE}/tv/airing_today?api_key={}&language={LANG}",
            self.api_key
        );
        self.fetch_results("airing_today_series", url).await
    }

    async fn search_multi(&self, query: &str) -> Result<Vec<CatalogRecord>, CatalogError> {
        let url = format!(
            "{TMDB_BASE}/search/multi?api_key={}&language={LANG}&query={}",
            self.api_key,
            urlencoding::encode(query)
        );
        self.fetch_results("search_multi", url).await
    }

    async fn videos(
        &self,
        media_type: MediaType,
        id: i32,
    ) -> Result<Vec<VideoEntry>, CatalogError> {
        let url = format!(
            "{TMDB_BASE}/{}/{id}/videos?api_key={}&language={LANG}",
            media_type.as_str(),
            self.api_key
        );
        let data: VideosResponse =
            self.get_json(&url)
                .await
                .map_err(|source| CatalogError {
                    operation: "videos",
                    source,
                })?;
        Ok(data.results)
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    results: Vec<CatalogRecord>,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    results: Vec<VideoEntry>,
}

/// Full image URL for a path fragment returned in a catalog record. We never
/// download the image, only hand the URL to consumers.
pub fn image_url(path: &str) -> String {
    format!("{IMAGE_BASE}{path}")
}
