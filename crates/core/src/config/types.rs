use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub enricher: EnricherConfig,
    #[serde(default)]
    pub relparse: Option<RelparseConfig>,
    #[serde(default)]
    pub backfill: Option<BackfillConfig>,
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("prewire.db")
}

/// Session behavior shared by every network
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Fixed delay before a dropped connection is retried
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

fn default_reconnect_delay() -> u64 {
    5
}

/// Store behavior
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Network whose mod-nukes replace the reason of an existing nuke row
    /// instead of inserting a second row
    #[serde(default)]
    pub flagged_network: Option<String>,
}

/// Genre provider credentials. A provider without a section is skipped in
/// the cascade.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EnricherConfig {
    #[serde(default)]
    pub musicbrainz: Option<MusicBrainzConfig>,
    #[serde(default)]
    pub spotify: Option<SpotifyConfig>,
    #[serde(default)]
    pub omdb: Option<OmdbConfig>,
    #[serde(default)]
    pub tmdb: Option<TmdbConfig>,
    #[serde(default)]
    pub tvmaze: Option<TvmazeConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MusicBrainzConfig {
    /// Identifying User-Agent, required by the MusicBrainz API terms
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Override the API base URL (useful for testing)
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for MusicBrainzConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            base_url: None,
        }
    }
}

fn default_user_agent() -> String {
    format!("prewire/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Override the OAuth token endpoint (useful for testing)
    #[serde(default)]
    pub token_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OmdbConfig {
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TmdbConfig {
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TvmazeConfig {
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Release-name classifier subprocess
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelparseConfig {
    /// Program invoked with the release name appended as the last argument;
    /// must print one JSON object on stdout
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_relparse_timeout")]
    pub timeout_secs: u64,
}

fn default_relparse_timeout() -> u64 {
    10
}

/// srrdb size/files backfill worker
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackfillConfig {
    #[serde(default = "default_backfill_feed_url")]
    pub feed_url: String,
    #[serde(default = "default_backfill_api_url")]
    pub api_url: String,
    /// Fallback poll interval when the feed carries no publication time
    #[serde(default = "default_backfill_poll")]
    pub poll_secs: u64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            feed_url: default_backfill_feed_url(),
            api_url: default_backfill_api_url(),
            poll_secs: default_backfill_poll(),
        }
    }
}

fn default_backfill_feed_url() -> String {
    "https://www.srrdb.com/feed/srrs".to_string()
}

fn default_backfill_api_url() -> String {
    "https://api.srrdb.com/v1/details".to_string()
}

fn default_backfill_poll() -> u64 {
    60
}

/// One network connection and its channels
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// Short name used as the network component of event sources
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub nickname: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub realname: Option<String>,
    #[serde(default)]
    pub nickserv_password: Option<String>,
    #[serde(default)]
    pub ssl_enabled: bool,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

fn default_port() -> u16 {
    6667
}

impl NetworkConfig {
    /// Whether any channel carries announce rules (the network feeds the
    /// ingest pipeline).
    pub fn has_input_channels(&self) -> bool {
        self.channels.iter().any(ChannelConfig::is_input)
    }

    /// Whether any channel subscribes to outbound event classes.
    pub fn has_output_channels(&self) -> bool {
        self.channels.iter().any(|c| !c.subscriptions().is_empty())
    }
}

/// One channel. Announce rules make it an input channel; a `type` list makes
/// it an output channel.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Only lines from this nick are classified, when set
    #[serde(default)]
    pub author: Option<String>,
    /// Event classes rebroadcast into this channel
    #[serde(rename = "type", default)]
    pub channel_type: Option<Vec<OutputClass>>,
    #[serde(default)]
    pub pre: Option<RuleConfig>,
    #[serde(default)]
    pub nuke: Option<RuleConfig>,
    #[serde(default)]
    pub info: Option<RuleConfig>,
    #[serde(default)]
    pub addold: Option<RuleConfig>,
}

impl ChannelConfig {
    pub fn is_input(&self) -> bool {
        self.pre.is_some() || self.nuke.is_some() || self.info.is_some() || self.addold.is_some()
    }

    pub fn subscriptions(&self) -> &[OutputClass] {
        self.channel_type.as_deref().unwrap_or(&[])
    }
}

/// Outbound event classes an output channel can subscribe to
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputClass {
    Pre,
    Nuke,
    Info,
}

/// One announce pattern: a regex plus the field → capture group mapping
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleConfig {
    pub pattern: String,
    #[serde(default)]
    pub groups: HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.database.path.to_str().unwrap(), "prewire.db");
        assert_eq!(config.session.reconnect_delay_secs, 5);
        assert!(config.networks.is_empty());
        assert!(config.relparse.is_none());
    }

    #[test]
    fn test_deserialize_network_with_input_channel() {
        let toml = r##"
[[networks]]
name = "examplenet"
host = "irc.example.net"
nickname = "prewire"

[[networks.channels]]
name = "#pre"
author = "PreBot"

[networks.channels.pre]
pattern = '\[PRE\] \[(\S+)\] (\S+)'
groups = { section = 1, release = 2 }
"##;
        let config: Config = toml::from_str(toml).unwrap();
        let network = &config.networks[0];
        assert_eq!(network.port, 6667);
        assert!(!network.ssl_enabled);
        assert!(network.has_input_channels());
        assert!(!network.has_output_channels());

        let channel = &network.channels[0];
        assert!(channel.is_input());
        assert_eq!(channel.author.as_deref(), Some("PreBot"));
        let rule = channel.pre.as_ref().unwrap();
        assert_eq!(rule.groups["section"], 1);
        assert_eq!(rule.groups["release"], 2);
    }

    #[test]
    fn test_deserialize_output_channel() {
        let toml = r##"
[[networks]]
name = "out"
host = "irc.example.org"
nickname = "prewire"

[[networks.channels]]
name = "#announce"
type = ["pre", "nuke"]
"##;
        let config: Config = toml::from_str(toml).unwrap();
        let channel = &config.networks[0].channels[0];
        assert!(!channel.is_input());
        assert_eq!(
            channel.subscriptions(),
            &[OutputClass::Pre, OutputClass::Nuke]
        );
        assert!(config.networks[0].has_output_channels());
    }

    #[test]
    fn test_deserialize_enricher_providers() {
        let toml = r#"
[enricher.omdb]
api_key = "k"

[enricher.spotify]
client_id = "id"
client_secret = "secret"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.enricher.omdb.is_some());
        assert!(config.enricher.spotify.is_some());
        assert!(config.enricher.tmdb.is_none());
    }

    #[test]
    fn test_backfill_defaults() {
        let config: Config = toml::from_str("[backfill]\n").unwrap();
        let backfill = config.backfill.unwrap();
        assert_eq!(backfill.feed_url, "https://www.srrdb.com/feed/srrs");
        assert_eq!(backfill.api_url, "https://api.srrdb.com/v1/details");
        assert_eq!(backfill.poll_secs, 60);

        let config: Config = toml::from_str("").unwrap();
        assert!(config.backfill.is_none());
    }

    #[test]
    fn test_relparse_defaults() {
        let toml = r#"
[relparse]
command = "relparse"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let relparse = config.relparse.unwrap();
        assert!(relparse.args.is_empty());
        assert_eq!(relparse.timeout_secs, 10);
    }
}
