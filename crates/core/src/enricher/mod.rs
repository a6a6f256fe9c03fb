//! Genre enrichment.
//!
//! A newly created release record of an enrichable media kind gets exactly
//! one enrichment pass: a fixed, kind-specific provider cascade where the
//! first non-empty answer wins. Providers are only believed on exact
//! normalized-title equality and every provider failure degrades to "no
//! genre" — enrichment can never fail a release.
//!
//! Cascades: Music → MusicBrainz, then Spotify (unless the artist is the
//! "Various" compilation placeholder). TV → OMDb, TMDB, TVmaze.
//! Movie → OMDb, TMDB.

mod cache;
mod musicbrainz;
mod normalize;
mod omdb;
mod spotify;
mod tmdb;
mod tvmaze;

pub use cache::{GenreCache, RequestStats, DEFAULT_CAPACITY};
pub use musicbrainz::MusicBrainzClient;
pub use normalize::{normalize_genre, normalize_title};
pub use omdb::OmdbClient;
pub use spotify::SpotifyClient;
pub use tmdb::TmdbClient;
pub use tvmaze::TvmazeClient;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::EnricherConfig;
use crate::relparse::{MediaKind, ParsedRelease};

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse provider response: {0}")]
    Parse(String),

    #[error("Token error: {0}")]
    Token(String),
}

/// One genre lookup. Which fields matter depends on the provider.
#[derive(Debug, Clone)]
pub struct GenreQuery {
    pub kind: MediaKind,
    /// Album title for music, show/film title otherwise.
    pub title: String,
    pub artist: Option<String>,
    pub title_extra: Option<String>,
    pub country: Option<String>,
    pub year: Option<i32>,
    /// Resolved ISO language code, see [`resolve_language`].
    pub language: String,
}

/// A genre provider. `Ok(None)` means the provider answered but had no
/// confident match; errors are treated the same by the cascade, they just
/// log louder.
#[async_trait]
pub trait GenreSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn genres(&self, query: &GenreQuery) -> Result<Option<Vec<String>>, EnrichError>;

    /// Rolling (last hour, last 24h) request counts, observability only.
    fn request_counts(&self) -> (usize, usize);
}

/// Runs the provider cascades. Slots left empty (unconfigured credentials)
/// are skipped.
pub struct MetadataEnricher {
    music_primary: Option<Arc<dyn GenreSource>>,
    music_fallback: Option<Arc<dyn GenreSource>>,
    video_primary: Option<Arc<dyn GenreSource>>,
    video_secondary: Option<Arc<dyn GenreSource>>,
    tv_last_resort: Option<Arc<dyn GenreSource>>,
}

impl MetadataEnricher {
    pub fn new(
        music_primary: Option<Arc<dyn GenreSource>>,
        music_fallback: Option<Arc<dyn GenreSource>>,
        video_primary: Option<Arc<dyn GenreSource>>,
        video_secondary: Option<Arc<dyn GenreSource>>,
        tv_last_resort: Option<Arc<dyn GenreSource>>,
    ) -> Self {
        Self {
            music_primary,
            music_fallback,
            video_primary,
            video_secondary,
            tv_last_resort,
        }
    }

    /// Build the cascade from configuration. MusicBrainz and TVmaze need no
    /// credentials and are always present; Spotify, OMDb and TMDB join only
    /// when configured.
    pub fn from_config(config: &EnricherConfig) -> Result<Self, EnrichError> {
        let musicbrainz = MusicBrainzClient::new(config.musicbrainz.clone().unwrap_or_default())?;
        let tvmaze = TvmazeClient::new(config.tvmaze.clone().unwrap_or_default())?;

        let spotify = match &config.spotify {
            Some(cfg) => Some(Arc::new(SpotifyClient::new(cfg.clone())?) as Arc<dyn GenreSource>),
            None => None,
        };
        let omdb = match &config.omdb {
            Some(cfg) => Some(Arc::new(OmdbClient::new(cfg.clone())?) as Arc<dyn GenreSource>),
            None => None,
        };
        let tmdb = match &config.tmdb {
            Some(cfg) => Some(Arc::new(TmdbClient::new(cfg.clone())?) as Arc<dyn GenreSource>),
            None => None,
        };

        Ok(Self::new(
            Some(Arc::new(musicbrainz)),
            spotify,
            omdb,
            tmdb,
            Some(Arc::new(tvmaze)),
        ))
    }

    /// Resolve the genre list for a classified release, or `None`. Results
    /// are normalized to their canonical stored form.
    pub async fn determine_genre(&self, parsed: &ParsedRelease) -> Option<Vec<String>> {
        let raw = match parsed.kind {
            MediaKind::Music => self.music_genres(parsed).await,
            MediaKind::Tv | MediaKind::Movie => self.video_genres(parsed).await,
            _ => None,
        }?;

        let genres: Vec<String> = raw
            .iter()
            .map(|g| normalize_genre(g))
            .filter(|g| !g.is_empty())
            .collect();
        if genres.is_empty() {
            None
        } else {
            Some(genres)
        }
    }

    async fn music_genres(&self, parsed: &ParsedRelease) -> Option<Vec<String>> {
        // Credited releases search as (artist, album); uncredited
        // compilation-style ones as (title, subtitle).
        let artist_name = parsed.artist.clone().or_else(|| parsed.title.clone())?;
        let album = if parsed.artist.is_some() {
            parsed.title.clone()
        } else {
            parsed.title_extra.clone()
        };

        let query = GenreQuery {
            kind: parsed.kind,
            title: album.clone().unwrap_or_default(),
            artist: Some(artist_name.clone()),
            title_extra: parsed.title_extra.clone(),
            country: parsed.country.clone(),
            year: parsed.year,
            language: resolve_language(parsed),
        };

        let mut genres = if album.is_some() {
            self.try_source(&self.music_primary, &query).await
        } else {
            None
        };

        let various = parsed.artist.as_deref() == Some("Various")
            || parsed.title.as_deref() == Some("Various");
        if genres.is_none() && !various {
            genres = self.try_source(&self.music_fallback, &query).await;
        }
        genres
    }

    async fn video_genres(&self, parsed: &ParsedRelease) -> Option<Vec<String>> {
        let title = parsed.title.clone()?;
        let query = GenreQuery {
            kind: parsed.kind,
            title,
            artist: None,
            title_extra: parsed.title_extra.clone(),
            country: parsed.country.clone(),
            year: parsed.year,
            language: resolve_language(parsed),
        };

        let mut genres = self.try_source(&self.video_primary, &query).await;
        if genres.is_none() {
            genres = self.try_source(&self.video_secondary, &query).await;
        }
        if genres.is_none() && parsed.kind == MediaKind::Tv {
            genres = self.try_source(&self.tv_last_resort, &query).await;
        }
        genres
    }

    async fn try_source(
        &self,
        source: &Option<Arc<dyn GenreSource>>,
        query: &GenreQuery,
    ) -> Option<Vec<String>> {
        let source = source.as_ref()?;
        match source.genres(query).await {
            Ok(Some(genres)) if !genres.is_empty() => {
                debug!(provider = source.name(), title = %query.title, ?genres, "genre match");
                Some(genres)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(provider = source.name(), title = %query.title, "genre lookup failed: {e}");
                None
            }
        }
    }
}

/// Language code for region-aware catalogs. No language information means
/// English; a multi-language release with no concrete code falls back to
/// French, the dominant source of multi-tagged releases.
pub fn resolve_language(parsed: &ParsedRelease) -> String {
    match &parsed.language {
        None => "en".to_string(),
        Some(map) => {
            let mut codes: Vec<&String> = map
                .keys()
                .filter(|code| !code.eq_ignore_ascii_case("multi"))
                .collect();
            codes.sort();
            match codes.first() {
                Some(code) => (*code).clone(),
                None => "fr".to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockGenreSource;
    use serde_json::json;
    use std::collections::HashMap;

    fn music_release(artist: Option<&str>, title: Option<&str>) -> ParsedRelease {
        ParsedRelease {
            kind: MediaKind::Music,
            title: title.map(str::to_string),
            title_extra: None,
            artist: artist.map(str::to_string),
            group: Some("GRP".to_string()),
            year: Some(2023),
            language: None,
            country: None,
            format: Some("FLAC".to_string()),
            device: None,
            os: None,
            flags: None,
        }
    }

    fn tv_release(title: &str) -> ParsedRelease {
        ParsedRelease {
            kind: MediaKind::Tv,
            title: Some(title.to_string()),
            title_extra: None,
            artist: None,
            group: None,
            year: Some(2023),
            language: None,
            country: None,
            format: Some("x264".to_string()),
            device: None,
            os: None,
            flags: None,
        }
    }

    fn languages(codes: &[&str]) -> Option<HashMap<String, serde_json::Value>> {
        Some(
            codes
                .iter()
                .map(|c| (c.to_string(), json!(true)))
                .collect(),
        )
    }

    #[test]
    fn test_resolve_language_defaults_to_english() {
        let parsed = tv_release("Show");
        assert_eq!(resolve_language(&parsed), "en");
    }

    #[test]
    fn test_resolve_language_ignores_multi() {
        let mut parsed = tv_release("Show");
        parsed.language = languages(&["MULTI", "de"]);
        assert_eq!(resolve_language(&parsed), "de");
        parsed.language = languages(&["MULTI"]);
        assert_eq!(resolve_language(&parsed), "fr");
    }

    #[tokio::test]
    async fn test_music_primary_wins() {
        let primary = Arc::new(MockGenreSource::with_genres(vec!["Hip Hop".to_string()]));
        let fallback = Arc::new(MockGenreSource::with_genres(vec!["Pop".to_string()]));
        let enricher = MetadataEnricher::new(
            Some(primary.clone()),
            Some(fallback.clone()),
            None,
            None,
            None,
        );

        let genres = enricher
            .determine_genre(&music_release(Some("Artist"), Some("Album")))
            .await
            .unwrap();
        assert_eq!(genres, vec!["hip.hop".to_string()]);
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn test_music_falls_back_on_empty_primary() {
        let primary = Arc::new(MockGenreSource::empty());
        let fallback = Arc::new(MockGenreSource::with_genres(vec!["Indie Rock".to_string()]));
        let enricher = MetadataEnricher::new(
            Some(primary.clone()),
            Some(fallback.clone()),
            None,
            None,
            None,
        );

        let genres = enricher
            .determine_genre(&music_release(Some("Artist"), Some("Album")))
            .await
            .unwrap();
        assert_eq!(genres, vec!["indie.rock".to_string()]);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn test_various_release_never_reaches_fallback() {
        let primary = Arc::new(MockGenreSource::empty());
        let fallback = Arc::new(MockGenreSource::with_genres(vec!["Pop".to_string()]));
        let enricher = MetadataEnricher::new(
            Some(primary.clone()),
            Some(fallback.clone()),
            None,
            None,
            None,
        );

        let mut parsed = music_release(None, Some("Various"));
        parsed.title_extra = Some("Hip Hop Classics Volume Three".to_string());
        let genres = enricher.determine_genre(&parsed).await;
        assert!(genres.is_none());
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn test_provider_error_degrades_to_next() {
        let primary = Arc::new(MockGenreSource::failing());
        let secondary = Arc::new(MockGenreSource::with_genres(vec!["Drama".to_string()]));
        let enricher = MetadataEnricher::new(
            None,
            None,
            Some(primary.clone()),
            Some(secondary.clone()),
            None,
        );

        let genres = enricher
            .determine_genre(&tv_release("Some Show"))
            .await
            .unwrap();
        assert_eq!(genres, vec!["drama".to_string()]);
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_tv_reaches_last_resort_but_movie_does_not() {
        let last = Arc::new(MockGenreSource::with_genres(vec!["Comedy".to_string()]));
        let enricher = MetadataEnricher::new(
            None,
            None,
            Some(Arc::new(MockGenreSource::empty())),
            Some(Arc::new(MockGenreSource::empty())),
            Some(last.clone()),
        );

        let genres = enricher.determine_genre(&tv_release("Show")).await.unwrap();
        assert_eq!(genres, vec!["comedy".to_string()]);

        let mut movie = tv_release("Film");
        movie.kind = MediaKind::Movie;
        assert!(enricher.determine_genre(&movie).await.is_none());
        assert_eq!(last.calls(), 1);
    }

    #[tokio::test]
    async fn test_unenrichable_kind_is_skipped() {
        let primary = Arc::new(MockGenreSource::with_genres(vec!["Action".to_string()]));
        let enricher =
            MetadataEnricher::new(None, None, Some(primary.clone()), None, None);

        let mut parsed = tv_release("Game");
        parsed.kind = MediaKind::Game;
        assert!(enricher.determine_genre(&parsed).await.is_none());
        assert_eq!(primary.calls(), 0);
    }

    #[tokio::test]
    async fn test_genres_are_normalized_and_empties_dropped() {
        let primary = Arc::new(MockGenreSource::with_genres(vec![
            "Rock 'n' Roll".to_string(),
            "...".to_string(),
        ]));
        let enricher =
            MetadataEnricher::new(Some(primary), None, None, None, None);

        let genres = enricher
            .determine_genre(&music_release(Some("Artist"), Some("Album")))
            .await
            .unwrap();
        assert_eq!(genres, vec!["rock&roll".to_string()]);
    }
}
