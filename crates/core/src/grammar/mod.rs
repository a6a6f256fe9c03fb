//! Per-channel message grammars.
//!
//! Every pre channel announces the same event kinds in its own format, so the
//! mapping from kind to regex and from field to capture group is data, not
//! code. Grammars are compiled and validated once at load time; a malformed
//! pattern or field/group mapping is rejected before any session connects.

use std::collections::HashMap;

use regex_lite::Regex;
use thiserror::Error;

use crate::config::{ChannelConfig, RuleConfig};

/// The event kinds a channel can announce, in classification order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Pre,
    Nuke,
    Info,
    Addold,
}

impl MessageKind {
    /// Classification is attempted in this fixed order; grammars are authored
    /// so a line matches at most one kind.
    pub const ORDER: [MessageKind; 4] = [
        MessageKind::Pre,
        MessageKind::Nuke,
        MessageKind::Info,
        MessageKind::Addold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Pre => "pre",
            MessageKind::Nuke => "nuke",
            MessageKind::Info => "info",
            MessageKind::Addold => "addold",
        }
    }

    /// The fields a grammar may bind for this kind.
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            MessageKind::Pre => &["section", "release"],
            MessageKind::Nuke => &["type", "release", "reason", "nukenet"],
            MessageKind::Info => &["type", "release", "files", "size", "genre"],
            MessageKind::Addold => &[
                "type",
                "release",
                "section",
                "size",
                "files",
                "genre",
                "timestamp",
            ],
        }
    }
}

/// Errors raised while compiling a channel grammar.
#[derive(Debug, Error)]
pub enum GrammarError {
    #[error("channel {channel}: invalid {kind} pattern: {message}")]
    BadPattern {
        channel: String,
        kind: &'static str,
        message: String,
    },

    #[error("channel {channel}: {kind} grammar binds unknown field '{field}'")]
    UnknownField {
        channel: String,
        kind: &'static str,
        field: String,
    },

    #[error(
        "channel {channel}: {kind} field '{field}' maps to group {group}, \
         but the pattern has {available} capture group(s)"
    )]
    GroupOutOfRange {
        channel: String,
        kind: &'static str,
        field: String,
        group: usize,
        available: usize,
    },
}

/// A compiled rule for one message kind on one channel.
#[derive(Debug)]
pub struct KindRule {
    regex: Regex,
    groups: HashMap<&'static str, usize>,
}

impl KindRule {
    fn compile(
        channel: &str,
        kind: MessageKind,
        cfg: &RuleConfig,
    ) -> Result<Self, GrammarError> {
        let regex = Regex::new(&cfg.pattern).map_err(|e| GrammarError::BadPattern {
            channel: channel.to_string(),
            kind: kind.as_str(),
            message: e.to_string(),
        })?;

        // captures_len() counts the implicit whole-match group 0.
        let available = regex.captures_len() - 1;

        let mut groups = HashMap::new();
        for (field, &group) in &cfg.groups {
            let known = kind
                .fields()
                .iter()
                .find(|f| **f == field.as_str())
                .copied()
                .ok_or_else(|| GrammarError::UnknownField {
                    channel: channel.to_string(),
                    kind: kind.as_str(),
                    field: field.clone(),
                })?;

            if group == 0 || group > available {
                return Err(GrammarError::GroupOutOfRange {
                    channel: channel.to_string(),
                    kind: kind.as_str(),
                    field: field.clone(),
                    group,
                    available,
                });
            }

            groups.insert(known, group);
        }

        Ok(Self { regex, groups })
    }

    /// Search the line anywhere. On a match, return the bound fields: a field
    /// whose group did not participate yields `None`; a field with no
    /// configured group is absent from the map entirely.
    pub fn extract(&self, line: &str) -> Option<HashMap<&'static str, Option<String>>> {
        let caps = self.regex.captures(line)?;
        let mut fields = HashMap::new();
        for (&field, &group) in &self.groups {
            fields.insert(field, caps.get(group).map(|m| m.as_str().to_string()));
        }
        Some(fields)
    }
}

/// Compiled grammar for one channel on one network.
#[derive(Debug)]
pub struct ChannelGrammar {
    /// Channel name, matched case-insensitively against incoming targets.
    pub channel: String,
    /// Only classify lines from this announcer nick, when set.
    pub author: Option<String>,
    rules: HashMap<MessageKind, KindRule>,
}

impl ChannelGrammar {
    /// Compile a channel's configured rules, rejecting malformed mappings.
    pub fn compile(cfg: &ChannelConfig) -> Result<Self, GrammarError> {
        let mut rules = HashMap::new();
        let kinds = [
            (MessageKind::Pre, &cfg.pre),
            (MessageKind::Nuke, &cfg.nuke),
            (MessageKind::Info, &cfg.info),
            (MessageKind::Addold, &cfg.addold),
        ];
        for (kind, rule_cfg) in kinds {
            if let Some(rule_cfg) = rule_cfg {
                rules.insert(kind, KindRule::compile(&cfg.name, kind, rule_cfg)?);
            }
        }
        Ok(Self {
            channel: cfg.name.clone(),
            author: cfg.author.clone(),
            rules,
        })
    }

    /// The rule for a kind, or `None` when this channel never emits it.
    pub fn rule(&self, kind: MessageKind) -> Option<&KindRule> {
        self.rules.get(&kind)
    }
}
