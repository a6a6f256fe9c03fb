//! TVmaze genre provider (TV last resort, keyless).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::cache::{GenreCache, RequestStats};
use super::normalize::normalize_title;
use super::{EnrichError, GenreQuery, GenreSource};
use crate::config::TvmazeConfig;

pub struct TvmazeClient {
    client: Client,
    base_url: String,
    cache: GenreCache<String>,
    stats: RequestStats,
}

impl TvmazeClient {
    pub fn new(config: TvmazeConfig) -> Result<Self, EnrichError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .unwrap_or_else(|| "https://api.tvmaze.com".to_string()),
            cache: GenreCache::default(),
            stats: RequestStats::new(),
        })
    }

    async fn search_shows(&self, title: &str) -> Result<Vec<SearchHit>, EnrichError> {
        let (hour, day) = self.stats.record();
        debug!("TVmaze API hits in the last 24 hours: {day} - in the last hour: {hour}");

        let response = self
            .client
            .get(format!("{}/search/shows", self.base_url))
            .query(&[("q", title)])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EnrichError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| EnrichError::Parse(e.to_string()))
    }
}

#[async_trait]
impl GenreSource for TvmazeClient {
    fn name(&self) -> &'static str {
        "tvmaze"
    }

    async fn genres(&self, query: &GenreQuery) -> Result<Option<Vec<String>>, EnrichError> {
        let key = normalize_title(&query.title);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let hits = self.search_shows(&query.title).await?;
        let genres = hits
            .first()
            .filter(|hit| normalize_title(&hit.show.name) == key)
            .map(|hit| hit.show.genres.clone());
        self.cache.insert(key, genres.clone());
        Ok(genres)
    }

    fn request_counts(&self) -> (usize, usize) {
        self.stats.counts()
    }
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    show: Show,
}

#[derive(Debug, Deserialize)]
struct Show {
    #[serde(default)]
    name: String,
    #[serde(default)]
    genres: Vec<String>,
}
