//! Canonical event fan-out.
//!
//! Accepted state changes become canonical events. The broadcaster routes
//! each event class (pre / nuke / info) to the output channels subscribed to
//! it and hands one flat JSON line per channel to the owning session's
//! outbound queue. A full or closed queue is logged and skipped so one dead
//! session never blocks the rest.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::OutputClass;
use crate::relparse::{MediaKind, ParsedRelease};

/// An accepted state change, ready for rebroadcast.
#[derive(Debug, Clone)]
pub enum CanonicalEvent {
    Pre {
        release: String,
        /// Classifier output for the new release, when classification
        /// succeeded. Drives the computed section.
        parsed: Option<ParsedRelease>,
    },
    Nuke {
        nuke_type: String,
        release: String,
        reason: String,
        nukenet: Option<String>,
    },
    Info {
        subkind: String,
        release: String,
        files: Option<i64>,
        size: Option<i64>,
        genre: Option<String>,
    },
}

impl CanonicalEvent {
    fn class(&self) -> OutputClass {
        match self {
            CanonicalEvent::Pre { .. } => OutputClass::Pre,
            CanonicalEvent::Nuke { .. } => OutputClass::Nuke,
            CanonicalEvent::Info { .. } => OutputClass::Info,
        }
    }
}

/// Where accepted state changes go. The store publishes through this seam so
/// it never depends on session plumbing.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: CanonicalEvent);
}

/// One line queued for delivery into one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundLine {
    pub channel: String,
    pub text: String,
}

/// One output session's subscriptions.
pub struct OutputRoute {
    /// Network name, for logging only.
    pub session: String,
    pub sender: mpsc::Sender<OutboundLine>,
    pub pre_channels: Vec<String>,
    pub nuke_channels: Vec<String>,
    pub info_channels: Vec<String>,
}

impl OutputRoute {
    fn channels(&self, class: OutputClass) -> &[String] {
        match class {
            OutputClass::Pre => &self.pre_channels,
            OutputClass::Nuke => &self.nuke_channels,
            OutputClass::Info => &self.info_channels,
        }
    }
}

pub struct Broadcaster {
    routes: Vec<OutputRoute>,
}

impl Broadcaster {
    pub fn new(routes: Vec<OutputRoute>) -> Self {
        Self { routes }
    }
}

#[async_trait]
impl EventSink for Broadcaster {
    async fn publish(&self, event: CanonicalEvent) {
        let class = event.class();
        let payload = build_payload(&event);
        let text = payload.to_string();

        for route in &self.routes {
            for channel in route.channels(class) {
                let line = OutboundLine {
                    channel: channel.clone(),
                    text: text.clone(),
                };
                // Never wait on a session's queue: a wedged session must not
                // hold up delivery to the others or the ingest worker.
                match route.sender.try_send(line) {
                    Ok(()) => {
                        debug!(session = %route.session, channel = %channel, "queued {text}");
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(
                            session = %route.session,
                            channel = %channel,
                            "dropping outbound line, session queue full"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        warn!(
                            session = %route.session,
                            channel = %channel,
                            "dropping outbound line, session queue closed"
                        );
                    }
                }
            }
        }
    }
}

/// Flat JSON record of the event's non-null fields. Pre payloads carry the
/// section computed from the classifier output; GENRE payloads carry the
/// genre as an array.
fn build_payload(event: &CanonicalEvent) -> Value {
    let mut map = Map::new();
    match event {
        CanonicalEvent::Pre { release, parsed } => {
            map.insert("release".to_string(), json!(release));
            map.insert(
                "section".to_string(),
                json!(determine_section(parsed.as_ref())),
            );
        }
        CanonicalEvent::Nuke {
            nuke_type,
            release,
            reason,
            nukenet,
        } => {
            map.insert("type".to_string(), json!(nuke_type));
            map.insert("release".to_string(), json!(release));
            map.insert("reason".to_string(), json!(reason));
            if let Some(nukenet) = nukenet {
                map.insert("nukenet".to_string(), json!(nukenet));
            }
        }
        CanonicalEvent::Info {
            subkind,
            release,
            files,
            size,
            genre,
        } => {
            map.insert("type".to_string(), json!(subkind));
            map.insert("release".to_string(), json!(release));
            if let Some(files) = files {
                map.insert("files".to_string(), json!(files));
            }
            if let Some(size) = size {
                map.insert("size".to_string(), json!(size));
            }
            if let Some(genre) = genre {
                if subkind == "GENRE" {
                    let genres: Vec<&str> = genre.split('/').collect();
                    map.insert("genre".to_string(), json!(genres));
                } else {
                    map.insert("genre".to_string(), json!(genre));
                }
            }
        }
    }
    Value::Object(map)
}

/// Section code for a classified release. Total: anything unrecognized maps
/// to "PRE".
pub fn determine_section(parsed: Option<&ParsedRelease>) -> &'static str {
    let Some(parsed) = parsed else {
        return "PRE";
    };
    let format = parsed.format.as_deref();
    match parsed.kind {
        MediaKind::ABook => "AUDiOBOOKS",
        MediaKind::Anime => "ANiME",
        MediaKind::App => match parsed.os.as_deref() {
            Some("Linux") => "LiNUX",
            Some("macOS") => "MACOS",
            _ => "APPS",
        },
        MediaKind::Bookware => "BOOKWARE",
        MediaKind::Ebook => "EBOOKS",
        MediaKind::Font => "FONTS",
        MediaKind::Game => match parsed.device.as_deref() {
            Some("Nintendo Switch") => "NSW",
            Some("Playstation 5") => "PS5",
            Some("Playstation 4") => "PS4",
            Some("Microsoft Xbox One") => "XBOXONE",
            Some("Microsoft Xbox360") => "XBOX360",
            _ => "GAMES",
        },
        MediaKind::Music => match format {
            Some("FLAC") => "FLAC",
            _ => "MP3",
        },
        MediaKind::MusicVideo => "MViD",
        MediaKind::Tv => match format {
            Some("x264") | Some("h264") => "TV-X264",
            Some("x265") | Some("h265") => "TV-X265",
            _ => "TV",
        },
        MediaKind::Sports => "SPORTS",
        MediaKind::Xxx => "XXX",
        MediaKind::Movie => {
            if format == Some("DVDR") {
                "DVDR"
            } else if parsed
                .flags
                .as_ref()
                .is_some_and(|f| f.iter().any(|flag| flag == "Complete"))
            {
                "BLURAY"
            } else {
                match format {
                    Some("x264") | Some("h264") => "X264",
                    Some("x265") | Some("h265") => "X265",
                    _ => "PRE",
                }
            }
        }
        MediaKind::Unknown => "PRE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(kind: MediaKind) -> ParsedRelease {
        ParsedRelease {
            kind,
            title: None,
            title_extra: None,
            artist: None,
            group: None,
            year: None,
            language: None,
            country: None,
            format: None,
            device: None,
            os: None,
            flags: None,
        }
    }

    #[test]
    fn test_determine_section_tv_by_format() {
        let mut release = parsed(MediaKind::Tv);
        release.format = Some("x264".to_string());
        assert_eq!(determine_section(Some(&release)), "TV-X264");
        release.format = Some("h265".to_string());
        assert_eq!(determine_section(Some(&release)), "TV-X265");
        release.format = Some("WEB".to_string());
        assert_eq!(determine_section(Some(&release)), "TV");
    }

    #[test]
    fn test_determine_section_movie_complete_flag_wins_over_codec() {
        let mut release = parsed(MediaKind::Movie);
        release.format = Some("x264".to_string());
        release.flags = Some(vec!["Complete".to_string()]);
        assert_eq!(determine_section(Some(&release)), "BLURAY");
        release.flags = None;
        assert_eq!(determine_section(Some(&release)), "X264");
    }

    #[test]
    fn test_determine_section_music() {
        let mut release = parsed(MediaKind::Music);
        release.format = Some("FLAC".to_string());
        assert_eq!(determine_section(Some(&release)), "FLAC");
        release.format = Some("MP3".to_string());
        assert_eq!(determine_section(Some(&release)), "MP3");
        release.format = None;
        assert_eq!(determine_section(Some(&release)), "MP3");
    }

    #[test]
    fn test_determine_section_game_devices() {
        let mut release = parsed(MediaKind::Game);
        release.device = Some("Nintendo Switch".to_string());
        assert_eq!(determine_section(Some(&release)), "NSW");
        release.device = None;
        assert_eq!(determine_section(Some(&release)), "GAMES");
    }

    #[test]
    fn test_determine_section_unclassified_defaults_to_pre() {
        assert_eq!(determine_section(None), "PRE");
        assert_eq!(determine_section(Some(&parsed(MediaKind::Unknown))), "PRE");
        assert_eq!(determine_section(Some(&parsed(MediaKind::Movie))), "PRE");
    }

    #[test]
    fn test_pre_payload_carries_computed_section() {
        let mut release = parsed(MediaKind::Tv);
        release.format = Some("h264".to_string());
        let payload = build_payload(&CanonicalEvent::Pre {
            release: "Show.S01E01.1080p.WEB.H264-GRP".to_string(),
            parsed: Some(release),
        });
        assert_eq!(payload["section"], "TV-X264");
        assert_eq!(payload["release"], "Show.S01E01.1080p.WEB.H264-GRP");
    }

    #[test]
    fn test_nuke_payload_drops_null_nukenet() {
        let payload = build_payload(&CanonicalEvent::Nuke {
            nuke_type: "NUKE".to_string(),
            release: "Some.Release-GRP".to_string(),
            reason: "bad.ivtc".to_string(),
            nukenet: None,
        });
        assert!(payload.get("nukenet").is_none());
        assert_eq!(payload["type"], "NUKE");
    }

    #[test]
    fn test_genre_payload_is_array() {
        let payload = build_payload(&CanonicalEvent::Info {
            subkind: "GENRE".to_string(),
            release: "Artist-Album-CD-FLAC-2023-GRP".to_string(),
            files: None,
            size: None,
            genre: Some("rock/indie".to_string()),
        });
        assert_eq!(payload["genre"], json!(["rock", "indie"]));
        assert!(payload.get("files").is_none());
    }

    #[test]
    fn test_info_payload_keeps_genre_as_string() {
        let payload = build_payload(&CanonicalEvent::Info {
            subkind: "INFO".to_string(),
            release: "Some.Release-GRP".to_string(),
            files: Some(23),
            size: Some(1150),
            genre: Some("rock".to_string()),
        });
        assert_eq!(payload["genre"], "rock");
        assert_eq!(payload["files"], 23);
        assert_eq!(payload["size"], 1150);
    }

    #[tokio::test]
    async fn test_publish_routes_by_class() {
        let (tx, mut rx) = mpsc::channel(8);
        let broadcaster = Broadcaster::new(vec![OutputRoute {
            session: "out".to_string(),
            sender: tx,
            pre_channels: vec!["#pre".to_string(), "#all".to_string()],
            nuke_channels: vec!["#nukes".to_string()],
            info_channels: vec![],
        }]);

        broadcaster
            .publish(CanonicalEvent::Nuke {
                nuke_type: "UNNUKE".to_string(),
                release: "Some.Release-GRP".to_string(),
                reason: "fine.after.all".to_string(),
                nukenet: Some("efnet".to_string()),
            })
            .await;

        let line = rx.recv().await.unwrap();
        assert_eq!(line.channel, "#nukes");
        let payload: Value = serde_json::from_str(&line.text).unwrap();
        assert_eq!(payload["type"], "UNNUKE");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_sends_one_line_per_subscribed_channel() {
        let (tx, mut rx) = mpsc::channel(8);
        let broadcaster = Broadcaster::new(vec![OutputRoute {
            session: "out".to_string(),
            sender: tx,
            pre_channels: vec!["#pre".to_string(), "#all".to_string()],
            nuke_channels: vec![],
            info_channels: vec![],
        }]);

        broadcaster
            .publish(CanonicalEvent::Pre {
                release: "Some.Release-GRP".to_string(),
                parsed: None,
            })
            .await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.channel, "#pre");
        assert_eq!(second.channel, "#all");
        assert_eq!(first.text, second.text);
    }

    #[tokio::test]
    async fn test_publish_survives_closed_session() {
        let (dead_tx, dead_rx) = mpsc::channel(1);
        drop(dead_rx);
        let (live_tx, mut live_rx) = mpsc::channel(8);
        let broadcaster = Broadcaster::new(vec![
            OutputRoute {
                session: "dead".to_string(),
                sender: dead_tx,
                pre_channels: vec!["#pre".to_string()],
                nuke_channels: vec![],
                info_channels: vec![],
            },
            OutputRoute {
                session: "live".to_string(),
                sender: live_tx,
                pre_channels: vec!["#pre".to_string()],
                nuke_channels: vec![],
                info_channels: vec![],
            },
        ]);

        broadcaster
            .publish(CanonicalEvent::Pre {
                release: "Some.Release-GRP".to_string(),
                parsed: None,
            })
            .await;

        assert!(live_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_publish_skips_full_queue_without_blocking() {
        let (stalled_tx, mut stalled_rx) = mpsc::channel(1);
        stalled_tx
            .send(OutboundLine {
                channel: "#pre".to_string(),
                text: "backlog".to_string(),
            })
            .await
            .unwrap();
        let (live_tx, mut live_rx) = mpsc::channel(8);
        let broadcaster = Broadcaster::new(vec![
            OutputRoute {
                session: "stalled".to_string(),
                sender: stalled_tx,
                pre_channels: vec!["#pre".to_string()],
                nuke_channels: vec![],
                info_channels: vec![],
            },
            OutputRoute {
                session: "live".to_string(),
                sender: live_tx,
                pre_channels: vec!["#pre".to_string()],
                nuke_channels: vec![],
                info_channels: vec![],
            },
        ]);

        let publish = broadcaster.publish(CanonicalEvent::Pre {
            release: "Some.Release-GRP".to_string(),
            parsed: None,
        });
        tokio::time::timeout(std::time::Duration::from_secs(1), publish)
            .await
            .expect("publish must not wait on a full session queue");

        let line = live_rx.recv().await.unwrap();
        assert_eq!(line.channel, "#pre");
        // The stalled session keeps its backlog; the new line was dropped.
        assert_eq!(stalled_rx.recv().await.unwrap().text, "backlog");
        assert!(stalled_rx.try_recv().is_err());
    }
}
