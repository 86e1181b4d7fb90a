// Bound Actions
//
// What a rule does when it fires. Hosts plug their own `Activatable`;
// configuration files can use the built-in log and command actions.

use super::context::AlertContext;
use crate::error::ActionError;
use serde::Deserialize;
use std::borrow::Cow;
use std::fmt;
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, info};

/// Activatable target bound to a rule
pub trait Activatable: Send + Sync {
    fn name(&self) -> &str;

    fn activate(&self, context: &AlertContext) -> Result<(), ActionError>;
}

impl fmt::Debug for dyn Activatable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Activatable({})", self.name())
    }
}

pub const DEFAULT_MESSAGE: &str = "${event-description} (${username}@${sid})";

/// Writes the expanded message to the log
#[derive(Debug, Clone)]
pub struct LogAction {
    message: String,
}

impl LogAction {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl Default for LogAction {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGE)
    }
}

impl Activatable for LogAction {
    fn name(&self) -> &str {
        "log"
    }

    fn activate(&self, context: &AlertContext) -> Result<(), ActionError> {
        info!(event = %context.event(), "{}", context.expand(&self.message));
        Ok(())
    }
}

/// Runs a shell command with the context exported to its environment
///
/// `${key}` substitutions are shell-quoted; the same values are also
/// available as `"$SESSION_WATCH_<KEY>"`.
#[derive(Debug, Clone)]
pub struct CommandAction {
    command: String,
}

impl CommandAction {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }

    /// `SESSION_WATCH_<KEY>` variable name for a context property
    pub fn variable_name(key: &str) -> String {
        let key: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("SESSION_WATCH_{}", key)
    }
}

impl Activatable for CommandAction {
    fn name(&self) -> &str {
        &self.command
    }

    fn activate(&self, context: &AlertContext) -> Result<(), ActionError> {
        // Substituted values are single words, never shell syntax
        let command = context.expand_with(&self.command, |value| {
            shell_escape::unix::escape(Cow::Borrowed(value)).into_owned()
        });
        debug!(command = %command, "Running alert command");

        let status = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .envs(
                context
                    .variables()
                    .into_iter()
                    .map(|(key, value)| (Self::variable_name(&key), value)),
            )
            .status()?;

        if !status.success() {
            return Err(ActionError::Failed {
                action: command,
                reason: status.to_string(),
            });
        }
        Ok(())
    }
}

/// Action section of a rule in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActionConfig {
    Log {
        #[serde(default = "default_message")]
        message: String,
    },
    Command {
        command: String,
    },
}

fn default_message() -> String {
    DEFAULT_MESSAGE.to_string()
}

impl ActionConfig {
    pub fn build(&self) -> Arc<dyn Activatable> {
        match self {
            ActionConfig::Log { message } => Arc::new(LogAction::new(message)),
            ActionConfig::Command { command } => Arc::new(CommandAction::new(command)),
        }
    }
}
