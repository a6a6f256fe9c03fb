//! Input line processing.
//!
//! One pipeline instance serves every input session: channel lookup, author
//! filter, format stripping, classification in [`MessageKind::ORDER`], then
//! dispatch into the store. A matched but incomplete event falls through to
//! the next kind; a line matching nothing is logged and dropped.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use tracing::{debug, warn};

use crate::classifier::{classify, Event};
use crate::config::NetworkConfig;
use crate::enricher::MetadataEnricher;
use crate::grammar::{ChannelGrammar, GrammarError, MessageKind};
use crate::session::{IncomingLine, LineHandler};
use crate::store::{NukeLedger, PreOutcome, ReleaseStore};

/// mIRC-style formatting: bold, reset, reverse, italics, underline, and
/// color codes with their optional fg(,bg) digits.
static FORMATTING: Lazy<Regex> = Lazy::new(|| {
    Regex::new("[\\x02\\x0f\\x16\\x1d\\x1f]|\\x03(\\d{0,2}(,\\d{1,2})?)?").unwrap()
});

/// Strip IRC formatting and color codes before classification.
pub fn strip_formatting(line: &str) -> String {
    FORMATTING.replace_all(line, "").into_owned()
}

pub struct IngestPipeline {
    releases: Arc<ReleaseStore>,
    nukes: Arc<NukeLedger>,
    enricher: Arc<MetadataEnricher>,
    /// Compiled grammars keyed by (network, lower-cased channel).
    grammars: HashMap<(String, String), ChannelGrammar>,
}

impl IngestPipeline {
    pub fn new(
        releases: Arc<ReleaseStore>,
        nukes: Arc<NukeLedger>,
        enricher: Arc<MetadataEnricher>,
        networks: &[NetworkConfig],
    ) -> Result<Self, GrammarError> {
        let mut grammars = HashMap::new();
        for network in networks {
            for channel in network.channels.iter().filter(|c| c.is_input()) {
                grammars.insert(
                    (network.name.clone(), channel.name.to_ascii_lowercase()),
                    ChannelGrammar::compile(channel)?,
                );
            }
        }
        Ok(Self {
            releases,
            nukes,
            enricher,
            grammars,
        })
    }

    async fn dispatch(&self, event: Event, source: &str, now: i64) {
        match event {
            Event::Pre(e) => {
                let (Some(release), Some(section)) = (e.release, e.section) else {
                    return;
                };
                match self.releases.apply_pre(&release, &section, source, now).await {
                    Ok(PreOutcome::Created { parsed: Some(parsed) })
                        if parsed.kind.is_enrichable() =>
                    {
                        if let Some(genres) = self.enricher.determine_genre(&parsed).await {
                            if let Err(e) =
                                self.releases.apply_genre_result(&release, &genres).await
                            {
                                warn!(release = %release, "genre write failed: {e}");
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!(release = %release, "pre reconciliation failed: {e}"),
                }
            }
            Event::Nuke(e) => {
                let (Some(release), Some(nuke_type), Some(reason)) =
                    (e.release, e.nuke_type, e.reason)
                else {
                    return;
                };
                if let Err(e) = self
                    .nukes
                    .apply_nuke(
                        &release,
                        &nuke_type,
                        &reason,
                        e.nukenet.as_deref(),
                        source,
                        now,
                    )
                    .await
                {
                    warn!(release = %release, "nuke reconciliation failed: {e}");
                }
            }
            Event::Info(e) => {
                let (Some(release), Some(subkind)) = (e.release, e.subkind) else {
                    return;
                };
                if let Err(e) = self
                    .releases
                    .apply_info(
                        &subkind,
                        &release,
                        e.files,
                        e.size,
                        e.genre.as_deref(),
                        source,
                        now,
                    )
                    .await
                {
                    warn!(release = %release, "info reconciliation failed: {e}");
                }
            }
            Event::Addold(e) => {
                let Some(release) = e.release else {
                    return;
                };
                if let Err(e) = self
                    .releases
                    .apply_addold(
                        &release,
                        e.section.as_deref(),
                        e.size,
                        e.files,
                        e.genre.as_deref(),
                        e.timestamp,
                        source,
                    )
                    .await
                {
                    warn!(release = %release, "backfill reconciliation failed: {e}");
                }
            }
        }
    }
}

#[async_trait]
impl LineHandler for IngestPipeline {
    async fn handle(&self, network: &str, line: IncomingLine) {
        let key = (network.to_string(), line.channel.to_ascii_lowercase());
        let Some(grammar) = self.grammars.get(&key) else {
            return;
        };
        if let Some(author) = &grammar.author {
            if !author.eq_ignore_ascii_case(&line.nick) {
                return;
            }
        }

        let text = strip_formatting(&line.text);
        let source = format!("{network}/{}", grammar.channel);
        let now = Utc::now().timestamp();

        for kind in MessageKind::ORDER {
            if let Some(event) = classify(kind, &text, grammar) {
                if event.is_actionable() {
                    self.dispatch(event, &source, now).await;
                    return;
                }
            }
        }

        debug!(network, channel = %line.channel, "unmatched line: {text}");
    }
}
