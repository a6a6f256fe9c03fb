//! srrdb size/files backfill.
//!
//! The announce feeds often carry a release long before anyone posts its
//! size. This worker polls the srrdb release feed and, for known rows still
//! missing files or size, fetches the archive details and feeds the computed
//! numbers through the same INFO reconciliation the live feed uses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::BackfillConfig;
use crate::store::{ReleaseStore, StoreError};

/// Margin added to the feed's publication time before the next pull.
const FEED_MARGIN_SECS: i64 = 65;

#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed parse failed: {0}")]
    Feed(String),

    #[error("response parse failed: {0}")]
    Parse(String),

    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, PartialEq, Eq)]
pub enum BackfillOutcome {
    Applied,
    /// Row unknown, or already has files and size.
    Skipped,
    /// Details carried no countable files; nothing to write.
    Empty,
}

/// Summary of one feed pull, used to schedule the next one.
pub struct PollSummary {
    pub applied: usize,
    pub published: Option<DateTime<Utc>>,
}

/// Trait seam over the archive lookup so the reconciliation logic is
/// testable offline.
#[async_trait]
pub trait ArchiveDetails: Send + Sync {
    async fn fetch(&self, release: &str) -> Result<Details, BackfillError>;
}

pub struct SrrdbBackfill {
    client: Client,
    feed_url: String,
    api_url: String,
    poll_interval: Duration,
    releases: Arc<ReleaseStore>,
}

impl SrrdbBackfill {
    pub fn new(
        config: BackfillConfig,
        releases: Arc<ReleaseStore>,
    ) -> Result<Self, BackfillError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            feed_url: config.feed_url,
            api_url: config.api_url,
            poll_interval: Duration::from_secs(config.poll_secs),
            releases,
        })
    }

    /// Poll the feed until shutdown. The first pull is delayed one interval
    /// so the output sessions are connected before anything is broadcast.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("backfill worker started");
        let mut delay = self.poll_interval;
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("backfill worker shutting down");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            delay = match self.poll_once(self, Utc::now().timestamp()).await {
                Ok(summary) => {
                    if summary.applied > 0 {
                        info!(applied = summary.applied, "backfill pass complete");
                    }
                    self.next_delay(summary.published)
                }
                Err(e) => {
                    warn!("backfill pass failed: {e}");
                    self.poll_interval
                }
            };
        }
    }

    /// One feed pull. Entries are processed oldest first; `details` is the
    /// archive lookup (the worker itself in production).
    pub async fn poll_once(
        &self,
        details: &dyn ArchiveDetails,
        now: i64,
    ) -> Result<PollSummary, BackfillError> {
        let response = self.client.get(&self.feed_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackfillError::Api {
                status: status.as_u16(),
                message: format!("feed fetch: {}", self.feed_url),
            });
        }
        let bytes = response.bytes().await?;
        let feed =
            feed_rs::parser::parse(&bytes[..]).map_err(|e| BackfillError::Feed(e.to_string()))?;

        let mut applied = 0;
        for entry in feed.entries.iter().rev() {
            let Some(title) = &entry.title else {
                continue;
            };
            let release = title.content.trim();
            if release.is_empty() {
                continue;
            }
            match self.backfill_release(details, release, now).await {
                Ok(BackfillOutcome::Applied) => applied += 1,
                Ok(_) => {}
                Err(e) => warn!(release, "backfill failed: {e}"),
            }
        }

        Ok(PollSummary {
            applied,
            published: feed.published,
        })
    }

    /// Look one release up in the store and fill its files/size from the
    /// archive details when missing. The store is checked first so complete
    /// rows cost no API request.
    pub async fn backfill_release(
        &self,
        details: &dyn ArchiveDetails,
        release: &str,
        now: i64,
    ) -> Result<BackfillOutcome, BackfillError> {
        let needs_fill = match self.releases.get_release(release)? {
            Some(row) => row.files.is_none() || row.size.is_none(),
            None => false,
        };
        if !needs_fill {
            return Ok(BackfillOutcome::Skipped);
        }

        let details = details.fetch(release).await?;
        let (files, size_mib) = file_summary(&details);
        if files == 0 || size_mib == 0 {
            debug!(release, "archive has no countable files");
            return Ok(BackfillOutcome::Empty);
        }

        self.releases
            .apply_info(
                "INFO",
                release,
                Some(files),
                Some(size_mib),
                None,
                "srrdb",
                now,
            )
            .await?;
        Ok(BackfillOutcome::Applied)
    }

    fn next_delay(&self, published: Option<DateTime<Utc>>) -> Duration {
        let Some(published) = published else {
            return self.poll_interval;
        };
        let next = published.timestamp() + FEED_MARGIN_SECS - Utc::now().timestamp();
        if next > 0 {
            Duration::from_secs(next as u64)
        } else {
            self.poll_interval
        }
    }
}

#[async_trait]
impl ArchiveDetails for SrrdbBackfill {
    async fn fetch(&self, release: &str) -> Result<Details, BackfillError> {
        let response = self
            .client
            .get(format!("{}/{release}", self.api_url))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackfillError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| BackfillError::Parse(e.to_string()))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Details {
    #[serde(default)]
    pub files: Vec<ArchivedFile>,
}

#[derive(Debug, Deserialize)]
pub struct ArchivedFile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: i64,
}

/// Count of payload files and their total size rounded to MiB. Metadata
/// files and the subs/proof/sample folders are not part of the release
/// payload.
fn file_summary(details: &Details) -> (i64, i64) {
    let mut count = 0i64;
    let mut total = 0i64;
    for file in details.files.iter().filter(|f| is_payload(&f.name)) {
        count += 1;
        total += file.size;
    }
    let mib = (total as f64 / (1024.0 * 1024.0)).round() as i64;
    (count, mib)
}

fn is_payload(name: &str) -> bool {
    let name = name.to_lowercase();
    if name.ends_with(".nfo") || name.ends_with(".sfv") || name.ends_with(".m3u") {
        return false;
    }
    !["subs/", "proof/", "sample/"]
        .iter()
        .any(|folder| name.contains(folder))
}
