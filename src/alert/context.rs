// Alert Context
//
// Values a bound action can read when a rule fires: session properties
// first, then agent properties, then the event itself.

use crate::event::Event;
use serde::Serialize;
use serde_json::{Map, Value};

/// Owned snapshot taken at activation time, safe to hand to a worker
#[derive(Debug, Clone, Default, Serialize)]
pub struct AlertContext {
    event: Event,
    session: Map<String, Value>,
    agent: Map<String, Value>,
}

fn lookup(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, value)| match value {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
}

impl AlertContext {
    pub fn new(event: Event, session: Map<String, Value>, agent: Map<String, Value>) -> Self {
        Self { event, session, agent }
    }

    pub fn event(&self) -> Event {
        self.event
    }

    /// Property by case-insensitive name, session values win on collision
    pub fn property(&self, key: &str) -> Option<String> {
        lookup(&self.session, key)
            .or_else(|| lookup(&self.agent, key))
            .or_else(|| self.event_property(key))
    }

    fn event_property(&self, key: &str) -> Option<String> {
        let value = match key.to_ascii_lowercase().as_str() {
            "event" => self.event.key(),
            "event-name" => self.event.name(),
            "event-description" => self.event.description(),
            _ => return None,
        };
        Some(value.to_string())
    }

    /// Every visible property once, in lookup order
    pub fn variables(&self) -> Vec<(String, String)> {
        let mut variables: Vec<(String, String)> = Vec::new();

        let names = self
            .session
            .keys()
            .chain(self.agent.keys())
            .map(String::as_str)
            .chain(["event", "event-name", "event-description"]);

        for name in names {
            if variables.iter().any(|(seen, _)| seen.eq_ignore_ascii_case(name)) {
                continue;
            }
            if let Some(value) = self.property(name) {
                variables.push((name.to_string(), value));
            }
        }

        variables
    }

    /// Replace `${key}` markers; unknown keys are left untouched
    pub fn expand(&self, template: &str) -> String {
        self.expand_with(template, |value| value.to_string())
    }

    /// Like `expand`, passing every substituted value through `render`
    pub fn expand_with<F: Fn(&str) -> String>(&self, template: &str, render: F) -> String {
        let mut output = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("${") {
            output.push_str(&rest[..start]);
            let after = &rest[start + 2..];

            match after.find('}') {
                Some(end) => {
                    let key = &after[..end];
                    match self.property(key) {
                        Some(value) => output.push_str(&render(&value)),
                        None => output.push_str(&rest[start..start + end + 3]),
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    output.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }

        output.push_str(rest);
        output
    }
}
