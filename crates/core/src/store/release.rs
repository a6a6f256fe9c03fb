//! Release record reconciliation.

use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use super::StoreError;
use crate::broadcast::{CanonicalEvent, EventSink};
use crate::relparse::{ParsedRelease, ReleaseClassifier};

/// One reconciled release row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRecord {
    pub release: String,
    /// How the row was first created: PRE, INFO or ADDOLD.
    pub origin_type: String,
    pub section: Option<String>,
    pub size: Option<i64>,
    pub files: Option<i64>,
    pub genre: Option<String>,
    pub source: Option<String>,
    pub timestamp: Option<i64>,
}

#[derive(Debug)]
pub enum PreOutcome {
    /// New row; carries the classifier output so the caller can decide on
    /// enrichment.
    Created { parsed: Option<ParsedRelease> },
    /// Already known; duplicate report, nothing broadcast.
    Duplicate,
}

#[derive(Debug, PartialEq, Eq)]
pub enum InfoOutcome {
    /// Raw-feed GENRE lines are never trusted; genre only enters through
    /// [`ReleaseStore::apply_genre_result`].
    DiscardedGenre,
    Inserted,
    Filled,
    Ignored,
}

#[derive(Debug, PartialEq, Eq)]
pub enum GenreOutcome {
    Applied,
    Ignored,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AddoldOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Reconciles announcements into the `pre` table and publishes accepted
/// changes. Writes happen under the shared connection lock; publishing and
/// classification happen after the guard is dropped.
pub struct ReleaseStore {
    conn: Arc<Mutex<Connection>>,
    sink: Arc<dyn EventSink>,
    classifier: Option<Arc<dyn ReleaseClassifier>>,
}

impl ReleaseStore {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        sink: Arc<dyn EventSink>,
        classifier: Option<Arc<dyn ReleaseClassifier>>,
    ) -> Self {
        Self {
            conn,
            sink,
            classifier,
        }
    }

    /// First sighting creates the row and broadcasts; anything later is a
    /// duplicate report and a no-op.
    pub async fn apply_pre(
        &self,
        release: &str,
        section: &str,
        source: &str,
        now: i64,
    ) -> Result<PreOutcome, StoreError> {
        {
            let conn = self.conn.lock().unwrap();
            let existing: Option<String> = conn
                .query_row(
                    "SELECT release FROM pre WHERE release = ?",
                    params![release],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Ok(PreOutcome::Duplicate);
            }
            conn.execute(
                "INSERT INTO pre (release, type, section, source, timestamp)
                 VALUES (?, 'PRE', ?, ?, ?)",
                params![release, section, source, now],
            )?;
        }

        // Classification is best-effort: a failed classifier costs us the
        // computed section and enrichment, never the record.
        let parsed = match &self.classifier {
            Some(classifier) => match classifier.classify(release, section).await {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!(release, "release classification failed: {e}");
                    None
                }
            },
            None => None,
        };

        self.sink
            .publish(CanonicalEvent::Pre {
                release: release.to_string(),
                parsed: parsed.clone(),
            })
            .await;

        Ok(PreOutcome::Created { parsed })
    }

    /// Size/files report. The first complete report wins; GENRE subkinds from
    /// the raw feed are discarded unconditionally.
    pub async fn apply_info(
        &self,
        subkind: &str,
        release: &str,
        files: Option<i64>,
        size: Option<i64>,
        genre: Option<&str>,
        source: &str,
        now: i64,
    ) -> Result<InfoOutcome, StoreError> {
        if subkind.eq_ignore_ascii_case("genre") {
            return Ok(InfoOutcome::DiscardedGenre);
        }

        let outcome = {
            let conn = self.conn.lock().unwrap();
            let row: Option<(Option<i64>, Option<i64>)> = conn
                .query_row(
                    "SELECT size, files FROM pre WHERE release = ?",
                    params![release],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            match row {
                None => {
                    conn.execute(
                        "INSERT INTO pre (release, type, size, files, source, timestamp)
                         VALUES (?, 'INFO', ?, ?, ?, ?)",
                        params![release, size, files, source, now],
                    )?;
                    InfoOutcome::Inserted
                }
                Some((None, None)) => {
                    conn.execute(
                        "UPDATE pre SET size = ?, files = ? WHERE release = ?",
                        params![size, files, release],
                    )?;
                    InfoOutcome::Filled
                }
                Some(_) => InfoOutcome::Ignored,
            }
        };

        if matches!(outcome, InfoOutcome::Inserted | InfoOutcome::Filled) {
            self.sink
                .publish(CanonicalEvent::Info {
                    subkind: subkind.to_uppercase(),
                    release: release.to_string(),
                    files,
                    size,
                    genre: genre.map(str::to_string),
                })
                .await;
        }

        Ok(outcome)
    }

    /// Enricher-only entry point. Fills genre when it is missing or a
    /// single-character placeholder, and broadcasts a GENRE info event.
    pub async fn apply_genre_result(
        &self,
        release: &str,
        genres: &[String],
    ) -> Result<GenreOutcome, StoreError> {
        if genres.is_empty() {
            return Ok(GenreOutcome::Ignored);
        }
        let genre = genres.join("/");

        let applied = {
            let conn = self.conn.lock().unwrap();
            let row: Option<Option<String>> = conn
                .query_row(
                    "SELECT genre FROM pre WHERE release = ?",
                    params![release],
                    |row| row.get(0),
                )
                .optional()?;
            match row {
                Some(current) if current.as_deref().map_or(true, |g| g.len() <= 1) => {
                    conn.execute(
                        "UPDATE pre SET genre = ? WHERE release = ?",
                        params![genre, release],
                    )?;
                    true
                }
                _ => false,
            }
        };

        if !applied {
            return Ok(GenreOutcome::Ignored);
        }

        self.sink
            .publish(CanonicalEvent::Info {
                subkind: "GENRE".to_string(),
                release: release.to_string(),
                files: None,
                size: None,
                genre: Some(genre),
            })
            .await;

        Ok(GenreOutcome::Applied)
    }

    /// Historical backfill. Fill-only, with two exceptions: a section that is
    /// literally "PRE" may be replaced, and a non-PRE origin is promoted to
    /// ADDOLD. Never broadcast; this is corrective data, not a live event.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply_addold(
        &self,
        release: &str,
        section: Option<&str>,
        size: Option<i64>,
        files: Option<i64>,
        genre: Option<&str>,
        timestamp: Option<i64>,
        source: &str,
    ) -> Result<AddoldOutcome, StoreError> {
        // Backfill feeds spell "absent" as literal placeholders.
        let section = section.filter(|s| *s != "None");
        let genre = genre.filter(|g| *g != "None");
        let size = size.filter(|&v| v != 0);
        let files = files.filter(|&v| v != 0);
        let timestamp = timestamp.filter(|&v| v != 0);

        let conn = self.conn.lock().unwrap();
        let row: Option<ReleaseRecord> = conn
            .query_row(
                "SELECT release, type, section, size, files, genre, source, timestamp
                 FROM pre WHERE release = ?",
                params![release],
                row_to_record,
            )
            .optional()?;

        let Some(row) = row else {
            conn.execute(
                "INSERT INTO pre (release, type, section, size, files, genre, source, timestamp)
                 VALUES (?, 'ADDOLD', ?, ?, ?, ?, ?, ?)",
                params![release, section, size, files, genre, source, timestamp],
            )?;
            return Ok(AddoldOutcome::Inserted);
        };

        let mut fields = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if row.section.as_deref() == Some("PRE") {
            if let Some(section) = section.filter(|s| *s != "PRE") {
                fields.push("section = ?");
                values.push(Box::new(section.to_string()));
            }
        }
        if row.size.is_none() {
            if let Some(size) = size {
                fields.push("size = ?");
                values.push(Box::new(size));
            }
        }
        if row.files.is_none() {
            if let Some(files) = files {
                fields.push("files = ?");
                values.push(Box::new(files));
            }
        }
        if row.genre.is_none() {
            if let Some(genre) = genre {
                fields.push("genre = ?");
                values.push(Box::new(genre.to_string()));
            }
        }
        if row.origin_type != "PRE" {
            if row.timestamp.is_none() {
                if let Some(timestamp) = timestamp {
                    fields.push("timestamp = ?");
                    values.push(Box::new(timestamp));
                }
            }
            fields.push("type = 'ADDOLD'");
        }

        if fields.is_empty() {
            return Ok(AddoldOutcome::Unchanged);
        }

        values.push(Box::new(release.to_string()));
        let sql = format!("UPDATE pre SET {} WHERE release = ?", fields.join(", "));
        conn.execute(&sql, rusqlite::params_from_iter(values.iter()))?;
        Ok(AddoldOutcome::Updated)
    }

    /// Look up one record (primarily for inspection and tests).
    pub fn get_release(&self, release: &str) -> Result<Option<ReleaseRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT release, type, section, size, files, genre, source, timestamp
                 FROM pre WHERE release = ?",
                params![release],
                row_to_record,
            )
            .optional()?)
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ReleaseRecord> {
    Ok(ReleaseRecord {
        release: row.get(0)?,
        origin_type: row.get(1)?,
        section: row.get(2)?,
        size: row.get(3)?,
        files: row.get(4)?,
        genre: row.get(5)?,
        source: row.get(6)?,
        timestamp: row.get(7)?,
    })
}
