//! MusicBrainz genre provider.
//!
//! Three requests per cold lookup: artist search, release-group search under
//! that artist, then the release-group's genre list. MusicBrainz requires an
//! identifying User-Agent.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::cache::{GenreCache, RequestStats};
use super::normalize::normalize_title;
use super::{EnrichError, GenreQuery, GenreSource};
use crate::config::MusicBrainzConfig;

pub struct MusicBrainzClient {
    client: Client,
    base_url: String,
    cache: GenreCache<(String, String)>,
    stats: RequestStats,
}

impl MusicBrainzClient {
    pub fn new(config: MusicBrainzConfig) -> Result<Self, EnrichError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(30))
            .build()?;

        let base_url = config
            .base_url
            .unwrap_or_else(|| "https://musicbrainz.org/ws/2".to_string());

        Ok(Self {
            client,
            base_url,
            cache: GenreCache::default(),
            stats: RequestStats::new(),
        })
    }

    fn record_hit(&self) {
        let (hour, day) = self.stats.record();
        debug!("MusicBrainz API hits in the last 24 hours: {day} - in the last hour: {hour}");
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, EnrichError> {
        self.record_hit();
        let response = self.client.get(url).query(query).send().await?;
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

    async fn lookup(
        &self,
        artist_name: &str,
        album_title: &str,
    ) -> Result<Option<Vec<String>>, EnrichError> {
        let artists: MbArtistSearch = self
            .get_json(
                &format!("{}/artist/", self.base_url),
                &[("query", artist_name), ("fmt", "json")],
            )
            .await?;
        let Some(artist) = artists.artists.first() else {
            return Ok(None);
        };

        let groups: MbReleaseGroupSearch = self
            .get_json(
                &format!("{}/release-group/", self.base_url),
                &[
                    ("artist", artist.id.as_str()),
                    ("releasegroup", album_title),
                    ("fmt", "json"),
                ],
            )
            .await?;

        let wanted = normalize_title(album_title);
        let Some(group) = groups
            .release_groups
            .iter()
            .find(|g| normalize_title(&g.title) == wanted)
        else {
            return Ok(None);
        };

        let detail: MbReleaseGroupDetail = self
            .get_json(
                &format!("{}/release-group/{}", self.base_url, group.id),
                &[("inc", "genres"), ("fmt", "json")],
            )
            .await?;

        Ok(Some(detail.genres.into_iter().map(|g| g.name).collect()))
    }
}

#[async_trait]
impl GenreSource for MusicBrainzClient {
    fn name(&self) -> &'static str {
        "musicbrainz"
    }

    async fn genres(&self, query: &GenreQuery) -> Result<Option<Vec<String>>, EnrichError> {
        let Some(artist) = query.artist.as_deref() else {
            return Ok(None);
        };
        let key = (normalize_title(artist), normalize_title(&query.title));
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let genres = self.lookup(artist, &query.title).await?;
        // An empty genre list is still a confident match; only a failed
        // match is a negative.
        self.cache.insert(key, genres.clone());
        Ok(genres)
    }

    fn request_counts(&self) -> (usize, usize) {
        self.stats.counts()
    }
}

#[derive(Debug, Deserialize)]
struct MbArtistSearch {
    #[serde(default)]
    artists: Vec<MbArtist>,
}

#[derive(Debug, Deserialize)]
struct MbArtist {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MbReleaseGroupSearch {
    #[serde(rename = "release-groups", default)]
    release_groups: Vec<MbReleaseGroup>,
}

#[derive(Debug, Deserialize)]
struct MbReleaseGroup {
    id: String,
    title: String,
}

#[derive(Debug, Deserialize)]
struct MbReleaseGroupDetail {
    #[serde(default)]
    genres: Vec<MbGenre>,
}

#[derive(Debug, Deserialize)]
struct MbGenre {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_release_group_search() {
        let json = r#"{
            "release-groups": [
                {"id": "rg-1", "title": "Some Album", "primary-type": "Album"},
                {"id": "rg-2", "title": "Some Album (Deluxe)"}
            ]
        }"#;
        let parsed: MbReleaseGroupSearch = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.release_groups.len(), 2);
        assert_eq!(parsed.release_groups[0].id, "rg-1");
    }

    #[test]
    fn test_parse_detail_without_genres() {
        let parsed: MbReleaseGroupDetail = serde_json::from_str(r#"{"id": "rg-1"}"#).unwrap();
        assert!(parsed.genres.is_empty());
    }

    #[tokio::test]
    async fn test_cache_short_circuits_lookup() {
        // base_url points nowhere reachable; a cache hit must not touch it.
        let client = MusicBrainzClient::new(MusicBrainzConfig {
            user_agent: "test/0.0".to_string(),
            base_url: Some("http://127.0.0.1:1".to_string()),
        })
        .unwrap();

        let key = (normalize_title("Artist"), normalize_title("Album"));
        client.cache.insert(key, Some(vec!["rock".to_string()]));

        let query = GenreQuery {
            kind: crate::relparse::MediaKind::Music,
            title: "Album".to_string(),
            artist: Some("Artist".to_string()),
            title_extra: None,
            country: None,
            year: None,
            language: "en".to_string(),
        };
        let genres = client.genres(&query).await.unwrap();
        assert_eq!(genres, Some(vec!["rock".to_string()]));
        assert_eq!(client.request_counts(), (0, 0));
    }
}
