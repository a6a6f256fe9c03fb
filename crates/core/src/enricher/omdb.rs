//! OMDb genre provider (movies and TV primary).
//!
//! OMDb's title search is exact-ish, so a lookup retries under alternate
//! names: the title itself, the subtitle, then the country-qualified title.
//! Genres come back as one comma-separated string; "N/A" means none.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::cache::{GenreCache, RequestStats};
use super::normalize::normalize_title;
use super::{EnrichError, GenreQuery, GenreSource};
use crate::config::OmdbConfig;

pub struct OmdbClient {
    client: Client,
    base_url: String,
    api_key: String,
    cache: GenreCache<(String, Option<i32>)>,
    stats: RequestStats,
}

impl OmdbClient {
    pub fn new(config: OmdbConfig) -> Result<Self, EnrichError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .unwrap_or_else(|| "http://www.omdbapi.com".to_string()),
            api_key: config.api_key,
            cache: GenreCache::default(),
            stats: RequestStats::new(),
        })
    }

    async fn search_title(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> Result<OmdbTitle, EnrichError> {
        let (hour, day) = self.stats.record();
        debug!("OMDb API hits in the last 24 hours: {day} - in the last hour: {hour}");

        let mut request = self
            .client
            .get(&self.base_url)
            .query(&[("t", title), ("apikey", self.api_key.as_str())]);
        if let Some(year) = year {
            request = request.query(&[("y", year.to_string())]);
        }

        let response = request.send().await?;
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
impl GenreSource for OmdbClient {
    fn name(&self) -> &'static str {
        "omdb"
    }

    async fn genres(&self, query: &GenreQuery) -> Result<Option<Vec<String>>, EnrichError> {
        let mut search_titles = vec![query.title.clone()];
        if let Some(extra) = &query.title_extra {
            search_titles.push(extra.clone());
        }
        if let Some(country) = &query.country {
            search_titles.push(format!("{} {}", query.title, country));
        }

        let wanted = normalize_title(&query.title);
        for search_title in search_titles {
            let key = (search_title.clone(), query.year);
            if let Some(cached) = self.cache.get(&key) {
                return Ok(cached);
            }

            let result = self.search_title(&search_title, query.year).await?;
            if normalize_title(result.title.as_deref().unwrap_or("")) == wanted {
                let genres = result
                    .genre
                    .filter(|g| !g.eq_ignore_ascii_case("n/a"))
                    .map(|g| g.split(',').map(|s| s.trim().to_string()).collect());
                self.cache.insert(key, genres.clone());
                return Ok(genres);
            }
            self.cache.insert(key, None);
        }

        Ok(None)
    }

    fn request_counts(&self) -> (usize, usize) {
        self.stats.counts()
    }
}

#[derive(Debug, Deserialize)]
struct OmdbTitle {
    #[serde(rename = "Title", default)]
    title: Option<String>,
    #[serde(rename = "Genre", default)]
    genre: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relparse::MediaKind;

    fn query(title: &str) -> GenreQuery {
        GenreQuery {
            kind: MediaKind::Movie,
            title: title.to_string(),
            artist: None,
            title_extra: None,
            country: None,
            year: Some(2023),
            language: "en".to_string(),
        }
    }

    #[test]
    fn test_parse_title_response() {
        let json = r#"{"Title": "Some Film", "Year": "2023", "Genre": "Drama, Thriller"}"#;
        let parsed: OmdbTitle = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Some Film"));
        assert_eq!(parsed.genre.as_deref(), Some("Drama, Thriller"));
    }

    #[test]
    fn test_parse_not_found_response() {
        let json = r#"{"Response": "False", "Error": "Movie not found!"}"#;
        let parsed: OmdbTitle = serde_json::from_str(json).unwrap();
        assert!(parsed.title.is_none());
        assert!(parsed.genre.is_none());
    }

    #[tokio::test]
    async fn test_cached_result_is_returned_without_request() {
        let client = OmdbClient::new(OmdbConfig {
            api_key: "k".to_string(),
            base_url: Some("http://127.0.0.1:1".to_string()),
        })
        .unwrap();
        client.cache.insert(
            ("Some Film".to_string(), Some(2023)),
            Some(vec!["Drama".to_string()]),
        );

        let genres = client.genres(&query("Some Film")).await.unwrap();
        assert_eq!(genres, Some(vec!["Drama".to_string()]));
        assert_eq!(client.request_counts(), (0, 0));
    }

    #[tokio::test]
    async fn test_cached_negative_ends_retry_chain() {
        let client = OmdbClient::new(OmdbConfig {
            api_key: "k".to_string(),
            base_url: Some("http://127.0.0.1:1".to_string()),
        })
        .unwrap();
        client.cache.insert(("Some Film".to_string(), Some(2023)), None);

        // A cached miss on the first candidate answers immediately; the
        // unreachable base_url proves no fallback request is attempted.
        let mut q = query("Some Film");
        q.title_extra = Some("Alternate Name".to_string());
        assert_eq!(client.genres(&q).await.unwrap(), None);
    }
}
