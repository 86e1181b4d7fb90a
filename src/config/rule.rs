// Rule Configuration
//
// A rule is a flat attribute object, read in file order so the last
// spelling of a session flag wins.

use crate::alert::{ActionConfig, Activatable, AlertProxy, LogAction};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::session::{SessionType, SessionTypeFilter};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Attributes naming the rule events, first present wins
const EVENT_ATTRIBUTES: [&str; 4] = ["trigger-event", "events", "event", "name"];

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct RuleConfig {
    attributes: Map<String, Value>,
}

/// Boolean attribute: JSON bool, 0/1 or a yes/no style string
pub fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => number.as_u64().filter(|n| *n <= 1).map(|n| n == 1),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Session flag named by an attribute key, any of the accepted spellings
fn session_flag(key: &str) -> Option<SessionType> {
    let key = key.to_ascii_lowercase();
    let name = key.strip_suffix("-session")?;
    let name = name
        .strip_prefix("allow-on-")
        .or_else(|| name.strip_prefix("on-"))
        .unwrap_or(name);
    SessionType::from_name(name)
}

fn text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl RuleConfig {
    pub fn new(attributes: Map<String, Value>) -> Self {
        Self { attributes }
    }

    fn string(&self, key: &str) -> Option<String> {
        self.attributes.get(key).map(text)
    }

    fn invalid(&self, rule: &str, attribute: &str, value: &Value) -> Error {
        Error::InvalidAttribute {
            rule: rule.to_string(),
            attribute: attribute.to_string(),
            value: text(value),
        }
    }

    /// Rule name for messages, `rule-<index>` when unnamed
    pub fn name(&self, index: usize) -> String {
        self.string("name").unwrap_or_else(|| format!("rule-{}", index))
    }

    pub fn events(&self, rule: &str) -> Result<Event> {
        let text = EVENT_ATTRIBUTES
            .iter()
            .find_map(|key| self.string(key))
            .ok_or_else(|| Error::MissingAttribute {
                rule: rule.to_string(),
                attribute: "trigger-event".to_string(),
            })?;
        Event::parse(&text)
    }

    pub fn filter(&self, rule: &str) -> Result<SessionTypeFilter> {
        let mut filter = SessionTypeFilter::default();

        for (key, value) in &self.attributes {
            let Some(flag) = session_flag(key) else {
                continue;
            };
            let allowed = parse_bool(value).ok_or_else(|| self.invalid(rule, key, value))?;
            filter.set(flag, allowed);
        }

        Ok(filter)
    }

    /// Pulse interval in seconds, 0 when absent
    pub fn interval(&self, rule: &str) -> Result<u64> {
        let Some(value) = self.attributes.get("interval") else {
            return Ok(0);
        };

        let seconds = match value {
            Value::Number(number) => number.as_u64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        };
        seconds.ok_or_else(|| self.invalid(rule, "interval", value))
    }

    pub fn action(&self, rule: &str) -> Result<Arc<dyn Activatable>> {
        match self.attributes.get("action") {
            Some(value) => {
                let config: ActionConfig = serde_json::from_value(value.clone())
                    .map_err(|_| self.invalid(rule, "action", value))?;
                Ok(config.build())
            }
            None => Ok(Arc::new(LogAction::default())),
        }
    }

    pub fn build(&self, index: usize) -> Result<AlertProxy> {
        let name = self.name(index);
        let events = self.events(&name)?;
        let interval = self.interval(&name)?;

        let mut proxy = AlertProxy::new(&name, events, self.action(&name)?)
            .with_filter(self.filter(&name)?);

        if let Some(class) = self.string("session-class") {
            proxy = proxy.with_classname(&class);
        }
        if let Some(service) = self.string("session-service") {
            proxy = proxy.with_service(&service);
        }

        if events.contains(Event::PULSE) {
            proxy = proxy.with_interval(interval);
        } else if interval > 0 {
            debug!(rule = %name, interval, "Interval ignored on non-pulse rule");
        }

        proxy.validate()?;
        Ok(proxy)
    }
}
