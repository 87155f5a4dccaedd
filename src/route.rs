//! Subject routing — per-folder rule lists compiled to regexes.
//!
//! First matching rule wins; a message matching nothing goes to the
//! configured default channel.

use std::collections::HashMap;

use regex::Regex;
use tracing::debug;

use crate::config::Config;
use crate::error::ConfigError;
use crate::notify::OutboundMessage;

/// A single compiled routing rule.
#[derive(Debug)]
pub struct RoutingRule {
    pattern: Regex,
    channel: i64,
}

/// Compiled routing rules for every configured folder.
#[derive(Debug)]
pub struct RoutingTable {
    folders: HashMap<String, Vec<RoutingRule>>,
    default_channel: i64,
}

impl RoutingTable {
    /// Compile every rule pattern in the config. A pattern that fails to
    /// compile rejects the whole config.
    pub fn compile(config: &Config) -> Result<Self, ConfigError> {
        let mut folders = HashMap::new();
        for folder in &config.folders {
            let rules = folder
                .rules
                .iter()
                .map(|rule| {
                    Regex::new(&rule.pattern)
                        .map(|pattern| RoutingRule {
                            pattern,
                            channel: rule.channel,
                        })
                        .map_err(|e| ConfigError::InvalidValue {
                            key: format!("folders.{}.rules.pattern", folder.name),
                            message: e.to_string(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            folders.insert(folder.name.clone(), rules);
        }
        Ok(Self {
            folders,
            default_channel: config.telegram.default_channel,
        })
    }

    /// Route a decoded message to its destination channel.
    pub fn route(&self, folder: &str, subject: &str, body: &str) -> OutboundMessage {
        if let Some(rules) = self.folders.get(folder) {
            for rule in rules {
                if rule.pattern.is_match(subject) {
                    debug!(
                        folder,
                        channel = rule.channel,
                        pattern = rule.pattern.as_str(),
                        "message matched routing rule"
                    );
                    return OutboundMessage::new(rule.channel, format!("{subject}\n{body}"));
                }
            }
        }

        debug!(folder, channel = self.default_channel, "message routed to default channel");
        OutboundMessage::new(
            self.default_channel,
            format!("subject: {subject}\n{body}"),
        )
    }
}
