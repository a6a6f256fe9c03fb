//! Spotify genre provider (music fallback).
//!
//! Spotify attaches genres to artists, not albums, so this is a single
//! artist search. Client-credentials tokens are cached and refreshed when
//! expired.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::cache::{GenreCache, RequestStats};
use super::normalize::normalize_title;
use super::{EnrichError, GenreQuery, GenreSource};
use crate::config::SpotifyConfig;

struct Token {
    access_token: String,
    expires_at: Instant,
}

pub struct SpotifyClient {
    client: Client,
    base_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<Token>>,
    cache: GenreCache<String>,
    stats: RequestStats,
}

impl SpotifyClient {
    pub fn new(config: SpotifyConfig) -> Result<Self, EnrichError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .unwrap_or_else(|| "https://api.spotify.com/v1".to_string()),
            token_url: config
                .token_url
                .unwrap_or_else(|| "https://accounts.spotify.com/api/token".to_string()),
            client_id: config.client_id,
            client_secret: config.client_secret,
            token: Mutex::new(None),
            cache: GenreCache::default(),
            stats: RequestStats::new(),
        })
    }

    fn cached_token(&self) -> Option<String> {
        let token = self.token.lock().unwrap();
        token
            .as_ref()
            .filter(|t| t.expires_at > Instant::now())
            .map(|t| t.access_token.clone())
    }

    async fn access_token(&self) -> Result<String, EnrichError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EnrichError::Token(format!("{status}: {body}")));
        }
        let grant: TokenResponse = response
            .json()
            .await
            .map_err(|e| EnrichError::Parse(e.to_string()))?;

        let access_token = grant.access_token.clone();
        // Refresh a minute early rather than race the expiry.
        let lifetime = Duration::from_secs(grant.expires_in.saturating_sub(60));
        *self.token.lock().unwrap() = Some(Token {
            access_token: grant.access_token,
            expires_at: Instant::now() + lifetime,
        });
        Ok(access_token)
    }

    async fn search_artist(&self, artist: &str) -> Result<Option<SpotifyArtist>, EnrichError> {
        let token = self.access_token().await?;

        let (hour, day) = self.stats.record();
        debug!("Spotify API hits in the last 24 hours: {day} - in the last hour: {hour}");

        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .bearer_auth(token)
            .query(&[("q", artist), ("type", "artist")])
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

        let search: SearchResponse = response
            .json()
            .await
            .map_err(|e| EnrichError::Parse(e.to_string()))?;
        Ok(search.artists.items.into_iter().next())
    }
}

#[async_trait]
impl GenreSource for SpotifyClient {
    fn name(&self) -> &'static str {
        "spotify"
    }

    async fn genres(&self, query: &GenreQuery) -> Result<Option<Vec<String>>, EnrichError> {
        let Some(artist) = query.artist.as_deref() else {
            return Ok(None);
        };
        let key = normalize_title(artist);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let genres = self
            .search_artist(artist)
            .await?
            .map(|artist| artist.genres);
        self.cache.insert(key, genres.clone());
        Ok(genres)
    }

    fn request_counts(&self) -> (usize, usize) {
        self.stats.counts()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    artists: ArtistPage,
}

#[derive(Debug, Deserialize)]
struct ArtistPage {
    #[serde(default)]
    items: Vec<SpotifyArtist>,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    #[serde(default)]
    genres: Vec<String>,
}
