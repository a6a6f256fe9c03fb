use std::collections::HashSet;

use super::{types::Config, ConfigError};
use crate::grammar::ChannelGrammar;

/// Validate configuration
/// Currently validates:
/// - Network names are unique and non-empty
/// - Every network has a host, nickname and non-zero port
/// - Every channel is an input channel, an output channel, or both
/// - Every announce rule compiles (pattern + field/group mapping)
/// - A configured relparse command is non-empty
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for network in &config.networks {
        if network.name.is_empty() {
            return Err(ConfigError::ValidationError(
                "network name cannot be empty".to_string(),
            ));
        }
        if !names.insert(network.name.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate network name '{}'",
                network.name
            )));
        }
        if network.host.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "network '{}': host cannot be empty",
                network.name
            )));
        }
        if network.port == 0 {
            return Err(ConfigError::ValidationError(format!(
                "network '{}': port cannot be 0",
                network.name
            )));
        }
        if network.nickname.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "network '{}': nickname cannot be empty",
                network.name
            )));
        }

        for channel in &network.channels {
            if !channel.is_input() && channel.subscriptions().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "network '{}': channel '{}' has neither announce rules nor a type list",
                    network.name, channel.name
                )));
            }
            // Reject malformed grammars at load time, not at first message.
            ChannelGrammar::compile(channel)
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }
    }

    if let Some(relparse) = &config.relparse {
        if relparse.command.is_empty() {
            return Err(ConfigError::ValidationError(
                "relparse.command cannot be empty".to_string(),
            ));
        }
    }

    Ok(())
}
