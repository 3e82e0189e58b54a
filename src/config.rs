use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{info, warn};

use crate::models::EventInfo;

const DEFAULT_EVENTS: &str =
    "cipherville=Cipherville,dsa-master=DSA Master,ethitech-mania=Ethitech Mania";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub events: Vec<EventInfo>,
    pub stats_collection: String,
    pub stats_document: String,
    pub participants_collection: String,
    pub session_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let events_raw = or_default(&lookup, "REGDASH_EVENTS", DEFAULT_EVENTS);
        let stats_raw = or_default(&lookup, "REGDASH_STATS_DOC", "counters/stats");
        let (stats_collection, stats_document) = split_document_path(&stats_raw)?;

        Ok(Self {
            database_url: lookup("DATABASE_URL"),
            max_connections: parse_or_default(&lookup, "REGDASH_MAX_CONNECTIONS", 5)?,
            events: parse_events(&events_raw)?,
            stats_collection,
            stats_document,
            participants_collection: or_default(&lookup, "REGDASH_PARTICIPANTS", "participants"),
            session_path: or_default(&lookup, "REGDASH_SESSION", ".regdash-session").into(),
        })
    }

    pub fn event(&self, id: &str) -> Option<&EventInfo> {
        self.events.iter().find(|event| event.id == id)
    }
}

fn or_default(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    })
}

fn parse_or_default<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| {
            warn!("Invalid {key} value: {e}");
            ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }
        }),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}

/// Parses `id=Display Name` pairs separated by commas, keeping declaration order.
pub fn parse_events(raw: &str) -> Result<Vec<EventInfo>, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        key: "REGDASH_EVENTS",
        value: raw.to_string(),
        reason,
    };

    let mut events: Vec<EventInfo> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, name) = entry
            .split_once('=')
            .ok_or_else(|| invalid(format!("entry {entry:?} is missing '='")))?;
        let (id, name) = (id.trim(), name.trim());
        if id.is_empty() || name.is_empty() {
            return Err(invalid(format!("entry {entry:?} needs an id and a name")));
        }
        if events.iter().any(|event| event.id == id) {
            return Err(invalid(format!("event {id:?} is declared twice")));
        }
        events.push(EventInfo::new(id, name));
    }

    if events.is_empty() {
        return Err(invalid("no events declared".to_string()));
    }
    Ok(events)
}

fn split_document_path(raw: &str) -> Result<(String, String), ConfigError> {
    match raw.split_once('/') {
        Some((collection, id)) if !collection.is_empty() && !id.is_empty() => {
            Ok((collection.to_string(), id.to_string()))
        }
        _ => Err(ConfigError::Invalid {
            key: "REGDASH_STATS_DOC",
            value: raw.to_string(),
            reason: "expected collection/id".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_cover_the_three_events() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        let ids: Vec<&str> = config.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["cipherville", "dsa-master", "ethitech-mania"]);
        assert_eq!(config.stats_collection, "counters");
        assert_eq!(config.stats_document, "stats");
        assert_eq!(config.max_connections, 5);
        assert!(config.database_url.is_none());
        assert_eq!(config.event("dsa-master").map(|e| e.name.as_str()), Some("DSA Master"));
    }

    #[test]
    fn custom_catalogue_keeps_declaration_order() {
        let config = Config::from_lookup(lookup(&[
            ("REGDASH_EVENTS", " zeta = Zeta Cup , all=All Hands"),
            ("REGDASH_MAX_CONNECTIONS", "2"),
        ]))
        .unwrap();
        assert_eq!(
            config.events,
            vec![EventInfo::new("zeta", "Zeta Cup"), EventInfo::new("all", "All Hands")]
        );
        assert_eq!(config.max_connections, 2);
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(parse_events("cipherville").is_err());
        assert!(parse_events("a=A,a=B").is_err());
        assert!(parse_events(" , ").is_err());
        assert!(Config::from_lookup(lookup(&[("REGDASH_STATS_DOC", "stats")])).is_err());
        assert!(Config::from_lookup(lookup(&[("REGDASH_MAX_CONNECTIONS", "many")])).is_err());
    }
}
