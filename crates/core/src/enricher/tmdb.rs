//! TMDB genre provider (movies and TV secondary).
//!
//! Two requests per cold lookup: a language/region-aware search, then the
//! detail endpoint for the expanded genre list. The same client serves both
//! film and show lookups; the query's media kind picks the endpoint pair.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::cache::{GenreCache, RequestStats};
use super::normalize::normalize_title;
use super::{EnrichError, GenreQuery, GenreSource};
use crate::config::TmdbConfig;
use crate::relparse::MediaKind;

type TmdbKey = (String, Option<i32>, String, Option<String>, bool);

pub struct TmdbClient {
    client: Client,
    base_url: String,
    api_key: String,
    cache: GenreCache<TmdbKey>,
    stats: RequestStats,
}

impl TmdbClient {
    pub fn new(config: TmdbConfig) -> Result<Self, EnrichError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .unwrap_or_else(|| "https://api.themoviedb.org/3".to_string()),
            api_key: config.api_key,
            cache: GenreCache::default(),
            stats: RequestStats::new(),
        })
    }

    fn record_hit(&self) {
        let (hour, day) = self.stats.record();
        debug!("TMDB API hits in the last 24 hours: {day} - in the last hour: {hour}");
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: String,
        params: Vec<(&'static str, String)>,
    ) -> Result<T, EnrichError> {
        self.record_hit();
        let response = self.client.get(url).query(&params).send().await?;
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

    async fn lookup(&self, query: &GenreQuery) -> Result<Option<Vec<String>>, EnrichError> {
        let tv = query.kind == MediaKind::Tv;
        let search_path = if tv { "search/tv" } else { "search/movie" };
        let detail_path = if tv { "tv" } else { "movie" };

        let mut params = vec![
            ("api_key", self.api_key.clone()),
            ("query", query.title.clone()),
            ("language", query.language.clone()),
        ];
        if let Some(year) = query.year {
            let name = if tv { "first_air_date_year" } else { "year" };
            params.push((name, year.to_string()));
        }
        if !tv {
            params.push(("include_adult", "false".to_string()));
            if let Some(region) = &query.country {
                params.push(("region", region.clone()));
            }
        }

        let search: SearchResponse = self
            .get_json(format!("{}/{}", self.base_url, search_path), params)
            .await?;

        let Some(first) = search.results.into_iter().next() else {
            return Ok(None);
        };
        let result_title = first.title.or(first.name).unwrap_or_default();
        if normalize_title(&result_title) != normalize_title(&query.title) {
            return Ok(None);
        }

        let detail: DetailResponse = self
            .get_json(
                format!("{}/{}/{}", self.base_url, detail_path, first.id),
                vec![
                    ("api_key", self.api_key.clone()),
                    ("language", query.language.clone()),
                ],
            )
            .await?;

        Ok(Some(detail.genres.into_iter().map(|g| g.name).collect()))
    }
}

#[async_trait]
impl GenreSource for TmdbClient {
    fn name(&self) -> &'static str {
        "tmdb"
    }

    async fn genres(&self, query: &GenreQuery) -> Result<Option<Vec<String>>, EnrichError> {
        let key: TmdbKey = (
            normalize_title(&query.title),
            query.year,
            query.language.clone(),
            query.country.clone(),
            query.kind == MediaKind::Tv,
        );
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let genres = self.lookup(query).await?;
        self.cache.insert(key, genres.clone());
        Ok(genres)
    }

    fn request_counts(&self) -> (usize, usize) {
        self.stats.counts()
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

/// Film results carry `title`; show results carry `name`.
#[derive(Debug, Deserialize)]
struct SearchResult {
    id: u64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailResponse {
    #[serde(default)]
    genres: Vec<TmdbGenre>,
}

#[derive(Debug, Deserialize)]
struct TmdbGenre {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_movie_search_result() {
        let json = r#"{"results": [{"id": 42, "title": "Some Film", "release_date": "2023-01-01"}]}"#;
        let parsed: SearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.results[0].id, 42);
        assert_eq!(parsed.results[0].title.as_deref(), Some("Some Film"));
        assert!(parsed.results[0].name.is_none());
    }

    #[test]
    fn test_parse_tv_search_result() {
        let json = r#"{"results": [{"id": 7, "name": "Some Show"}]}"#;
        let parsed: SearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.results[0].name.as_deref(), Some("Some Show"));
    }

    #[test]
    fn test_parse_detail_genres() {
        let json = r#"{"id": 42, "genres": [{"id": 18, "name": "Drama"}, {"id": 53, "name": "Thriller"}]}"#;
        let parsed: DetailResponse = serde_json::from_str(json).unwrap();
        let names: Vec<String> = parsed.genres.into_iter().map(|g| g.name).collect();
        assert_eq!(names, vec!["Drama".to_string(), "Thriller".to_string()]);
    }

    #[tokio::test]
    async fn test_movie_and_tv_lookups_cache_separately() {
        let client = TmdbClient::new(TmdbConfig {
            api_key: "k".to_string(),
            base_url: Some("http://127.0.0.1:1".to_string()),
        })
        .unwrap();

        let movie_key: TmdbKey = (
            normalize_title("Twin Title"),
            Some(2023),
            "en".to_string(),
            None,
            false,
        );
        client
            .cache
            .insert(movie_key, Some(vec!["Drama".to_string()]));

        let query = GenreQuery {
            kind: MediaKind::Tv,
            title: "Twin Title".to_string(),
            artist: None,
            title_extra: None,
            country: None,
            year: Some(2023),
            language: "en".to_string(),
        };
        // Same title as a show is a different key, so this goes to the
        // (unreachable) network and errors instead of hitting the cache.
        assert!(client.genres(&query).await.is_err());
    }
}
