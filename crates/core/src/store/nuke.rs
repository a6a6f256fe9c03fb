//! Nuke ledger reconciliation.
//!
//! Every relay reports nukes independently. The first unique
//! (release, type, reason) row is authoritative; later reports may only fill
//! a missing nukenet. One documented network systematically reports
//! modifications as plain nukes, so its rows get corrected in place when
//! another network announces the real MODNUKE.

use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

use super::StoreError;
use crate::broadcast::{CanonicalEvent, EventSink};

/// One nuke ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NukeRecord {
    pub release: String,
    pub nuke_type: String,
    pub reason: Option<String>,
    pub nukenet: Option<String>,
    pub source: Option<String>,
    pub timestamp: Option<i64>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum NukeOutcome {
    Inserted,
    /// A flagged-network plain NUKE was corrected in place to this event's
    /// type and source.
    Promoted,
    /// Known row, only the missing nukenet was supplied.
    NukenetFilled,
    /// Known row with nothing left to fill.
    Duplicate,
    /// Flagged-network re-report of a modification it already mis-reported.
    Dropped,
}

pub struct NukeLedger {
    conn: Arc<Mutex<Connection>>,
    sink: Arc<dyn EventSink>,
    /// Network whose nuke rows are subject to in-place correction.
    flagged_network: Option<String>,
}

impl NukeLedger {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        sink: Arc<dyn EventSink>,
        flagged_network: Option<String>,
    ) -> Self {
        Self {
            conn,
            sink,
            flagged_network,
        }
    }

    fn source_is_flagged(&self, source: &str) -> bool {
        match &self.flagged_network {
            Some(flagged) => source.split('/').next() == Some(flagged.as_str()),
            None => false,
        }
    }

    /// Reconcile one nuke-class announcement. `nuke_type` is upper-cased
    /// before any comparison.
    pub async fn apply_nuke(
        &self,
        release: &str,
        nuke_type: &str,
        reason: &str,
        nukenet: Option<&str>,
        source: &str,
        now: i64,
    ) -> Result<NukeOutcome, StoreError> {
        let nuke_type = nuke_type.to_uppercase();

        let outcome = {
            let conn = self.conn.lock().unwrap();

            // The flagged network replays modifications it has already
            // mis-reported; an identical MODNUKE on file means this event
            // carries nothing new.
            if self.source_is_flagged(source) {
                let row: Option<String> = conn
                    .query_row(
                        "SELECT release FROM nuke
                         WHERE release = ? AND type = 'MODNUKE' AND reason = ? AND nukenet = ?",
                        params![release, reason, nukenet],
                        |row| row.get(0),
                    )
                    .optional()?;
                if row.is_some() {
                    return Ok(NukeOutcome::Dropped);
                }
            }

            // A MODNUKE from anywhere corrects a matching flagged-network
            // plain NUKE in place.
            if nuke_type == "MODNUKE" {
                if let Some(flagged) = &self.flagged_network {
                    let pattern = format!("{flagged}/%");
                    let row: Option<String> = conn
                        .query_row(
                            "SELECT release FROM nuke
                             WHERE release = ? AND type = 'NUKE' AND reason = ?
                               AND nukenet = ? AND source LIKE ?",
                            params![release, reason, nukenet, pattern],
                            |row| row.get(0),
                        )
                        .optional()?;
                    if row.is_some() {
                        // Only the plain NUKE row is rewritten; an UNNUKE
                        // sharing the key must keep its type.
                        conn.execute(
                            "UPDATE nuke SET type = ?, source = ?, timestamp = ?
                             WHERE release = ? AND type = 'NUKE' AND reason = ? AND nukenet = ?",
                            params![nuke_type, source, now, release, reason, nukenet],
                        )?;
                        NukeOutcome::Promoted
                    } else {
                        self.apply_default(&conn, release, &nuke_type, reason, nukenet, source, now)?
                    }
                } else {
                    self.apply_default(&conn, release, &nuke_type, reason, nukenet, source, now)?
                }
            } else {
                self.apply_default(&conn, release, &nuke_type, reason, nukenet, source, now)?
            }
        };

        if matches!(outcome, NukeOutcome::Inserted | NukeOutcome::Promoted) {
            self.sink
                .publish(CanonicalEvent::Nuke {
                    nuke_type,
                    release: release.to_string(),
                    reason: reason.to_string(),
                    nukenet: nukenet.map(str::to_string),
                })
                .await;
        }

        Ok(outcome)
    }

    fn apply_default(
        &self,
        conn: &Connection,
        release: &str,
        nuke_type: &str,
        reason: &str,
        nukenet: Option<&str>,
        source: &str,
        now: i64,
    ) -> Result<NukeOutcome, StoreError> {
        let row: Option<Option<String>> = conn
            .query_row(
                "SELECT nukenet FROM nuke WHERE release = ? AND type = ? AND reason = ?",
                params![release, nuke_type, reason],
                |row| row.get(0),
            )
            .optional()?;

        match row {
            None => {
                conn.execute(
                    "INSERT INTO nuke (release, type, reason, nukenet, source, timestamp)
                     VALUES (?, ?, ?, ?, ?, ?)",
                    params![release, nuke_type, reason, nukenet, source, now],
                )?;
                Ok(NukeOutcome::Inserted)
            }
            Some(None) if nukenet.is_some() => {
                conn.execute(
                    "UPDATE nuke SET nukenet = ? WHERE release = ? AND type = ? AND reason = ?",
                    params![nukenet, release, nuke_type, reason],
                )?;
                Ok(NukeOutcome::NukenetFilled)
            }
            Some(_) => Ok(NukeOutcome::Duplicate),
        }
    }

    /// All ledger rows for one release, oldest first.
    pub fn get_nukes(&self, release: &str) -> Result<Vec<NukeRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT release, type, reason, nukenet, source, timestamp
             FROM nuke WHERE release = ? ORDER BY id",
        )?;
        let rows = stmt.query_map(params![release], |row| {
            Ok(NukeRecord {
                release: row.get(0)?,
                nuke_type: row.get(1)?,
                reason: row.get(2)?,
                nukenet: row.get(3)?,
                source: row.get(4)?,
                timestamp: row.get(5)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}
