//! Message classification: raw channel line → typed event.
//!
//! Classification is purely grammar-driven; the pipeline decides afterwards
//! whether a match carries enough fields to act on (an incomplete match
//! falls through to the next kind in [`MessageKind::ORDER`]).

use std::collections::HashMap;

use crate::grammar::{ChannelGrammar, MessageKind};

/// A classified line. All fields are optional at this stage; required-field
/// completeness is a per-kind concern checked by [`Event::is_actionable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Pre(PreEvent),
    Nuke(NukeEvent),
    Info(InfoEvent),
    Addold(AddoldEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreEvent {
    pub release: Option<String>,
    pub section: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NukeEvent {
    /// NUKE, MODNUKE, UNNUKE and friends, as announced.
    pub nuke_type: Option<String>,
    pub release: Option<String>,
    pub reason: Option<String>,
    pub nukenet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoEvent {
    /// INFO or GENRE, as announced.
    pub subkind: Option<String>,
    pub release: Option<String>,
    pub files: Option<i64>,
    /// Size in whole MiB, rounded half-up from the announced float.
    pub size: Option<i64>,
    pub genre: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddoldEvent {
    pub subkind: Option<String>,
    pub release: Option<String>,
    pub section: Option<String>,
    pub size: Option<i64>,
    pub files: Option<i64>,
    pub genre: Option<String>,
    /// Original announce time (epoch seconds) carried by the backfill.
    pub timestamp: Option<i64>,
}

impl Event {
    /// Whether the match carries the fields its kind requires. Incomplete
    /// matches are treated as non-matches by the pipeline.
    pub fn is_actionable(&self) -> bool {
        match self {
            Event::Pre(e) => e.release.is_some() && e.section.is_some(),
            Event::Nuke(e) => {
                e.release.is_some() && e.nuke_type.is_some() && e.reason.is_some()
            }
            Event::Info(e) => e.release.is_some() && e.subkind.is_some(),
            Event::Addold(e) => e.release.is_some() && e.section.is_some(),
        }
    }
}

/// Classify a line against one kind of one channel's grammar.
///
/// Returns `None` when the channel has no rule for the kind or the regex does
/// not match anywhere in the line.
pub fn classify(kind: MessageKind, line: &str, grammar: &ChannelGrammar) -> Option<Event> {
    let fields = grammar.rule(kind)?.extract(line)?;

    let event = match kind {
        MessageKind::Pre => Event::Pre(PreEvent {
            release: text(&fields, "release"),
            section: text(&fields, "section"),
        }),
        MessageKind::Nuke => Event::Nuke(NukeEvent {
            nuke_type: text(&fields, "type"),
            release: text(&fields, "release"),
            reason: text(&fields, "reason"),
            nukenet: text(&fields, "nukenet"),
        }),
        MessageKind::Info => Event::Info(InfoEvent {
            subkind: text(&fields, "type"),
            release: text(&fields, "release"),
            files: integer(&fields, "files"),
            size: mebibytes(&fields, "size"),
            genre: text(&fields, "genre"),
        }),
        MessageKind::Addold => Event::Addold(AddoldEvent {
            subkind: text(&fields, "type"),
            release: text(&fields, "release"),
            section: text(&fields, "section"),
            size: mebibytes(&fields, "size"),
            files: integer(&fields, "files"),
            genre: text(&fields, "genre"),
            timestamp: integer(&fields, "timestamp"),
        }),
    };

    Some(event)
}

fn text(fields: &HashMap<&'static str, Option<String>>, name: &str) -> Option<String> {
    fields.get(name).cloned().flatten()
}

/// Announced sizes are float MiB; store the nearest integer, never zero for
/// "missing".
fn mebibytes(fields: &HashMap<&'static str, Option<String>>, name: &str) -> Option<i64> {
    let raw = text(fields, name)?;
    let value: f64 = raw.trim().parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.round() as i64)
}

fn integer(fields: &HashMap<&'static str, Option<String>>, name: &str) -> Option<i64> {
    text(fields, name)?.trim().parse().ok()
}
