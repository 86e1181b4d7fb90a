// Config Module - JSON configuration
//
// Monitor settings, agents and their rules. A missing default file means
// the built-in defaults; an explicit path must exist.

pub mod rule;

pub use rule::{parse_bool, RuleConfig};

use crate::agent::{Agent, DEFAULT_MAX_PULSE_CHECK};
use crate::error::Result;
use crate::notification::{ActivationSender, DispatchMode};
use crate::session::SessionRegistry;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_SESSIONS_DIR: &str = "/run/systemd/sessions";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MonitorConfig {
    pub sessions_dir: PathBuf,
    pub dispatch: DispatchMode,
    pub agents: Vec<AgentConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sessions_dir: PathBuf::from(DEFAULT_SESSIONS_DIR),
            dispatch: DispatchMode::default(),
            agents: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AgentConfig {
    pub name: String,
    pub label: String,
    pub update_timer: u64,
    pub max_update_timer: u64,
    pub rules: Vec<RuleConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "users".to_string(),
            label: String::new(),
            update_timer: 0,
            max_update_timer: DEFAULT_MAX_PULSE_CHECK,
            rules: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Build the agent with every rule installed
    ///
    /// The first bad rule aborts the agent.
    pub fn build(&self, registry: &Arc<SessionRegistry>, sender: Arc<ActivationSender>) -> Result<Arc<Agent>> {
        let agent = Agent::new(&self.name, registry, sender)
            .with_label(&self.label)
            .with_timer(self.update_timer)
            .with_max_pulse_check(self.max_update_timer);

        for (index, rule) in self.rules.iter().enumerate() {
            agent.push_back(rule.build(index)?)?;
        }

        debug!(agent = %self.name, rules = self.rules.len(), timer = agent.timer(), "Agent configured");
        Ok(Arc::new(agent))
    }
}

/// `<config dir>/session-watch/config.json`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("session-watch").join("config.json"))
}

pub fn load_config(path: &Path) -> Result<MonitorConfig> {
    let contents = fs::read_to_string(path)?;
    let config: MonitorConfig = serde_json::from_str(&contents)?;
    info!(path = %path.display(), agents = config.agents.len(), "Configuration loaded");
    Ok(config)
}

/// Load the explicit path, else the default file if present, else defaults
pub fn read_config(path: Option<&Path>) -> Result<MonitorConfig> {
    if let Some(path) = path {
        return load_config(path);
    }

    match default_config_path() {
        Some(path) if path.exists() => load_config(&path),
        _ => {
            debug!("No configuration file, using defaults");
            Ok(MonitorConfig::default())
        }
    }
}
