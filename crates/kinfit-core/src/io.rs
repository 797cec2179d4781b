use std::{fs, path::PathBuf, str::FromStr};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{data::Event, KinFitError, KinFitResult};

/// Expand `~` and environment variables in a user-supplied path.
pub fn expand_path(path: &str) -> KinFitResult<PathBuf> {
    Ok(PathBuf::from(shellexpand::full(path)?.as_ref()))
}

/// Read a JSON array of [`Event`]s and validate each of them.
pub fn read_events(path: &str) -> KinFitResult<Vec<Event>> {
    let text = fs::read_to_string(expand_path(path)?)?;
    let events: Vec<Event> = serde_json::from_str(&text)?;
    for event in &events {
        event.validate()?;
    }
    tracing::info!(path, n_events = events.len(), "read events");
    Ok(events)
}

/// Write any serializable value as pretty-printed JSON.
pub fn write_json<T: Serialize>(path: &str, value: &T) -> KinFitResult<()> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(expand_path(path)?, text)?;
    Ok(())
}

/// A single value in a configuration section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

/// A configuration file made of one table per finder, e.g.
/// ```toml
/// [k0s]
/// mode = "kinfit"
/// SignalPion_Pt_min = 0.5
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigTable {
    sections: IndexMap<String, IndexMap<String, ConfigValue>>,
}

impl ConfigTable {
    pub fn read(path: &str) -> KinFitResult<Self> {
        let text = fs::read_to_string(expand_path(path)?)?;
        text.parse()
    }

    pub fn section(&self, name: &str) -> Option<&IndexMap<String, ConfigValue>> {
        self.sections.get(name)
    }

    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }
}

impl FromStr for ConfigTable {
    type Err = KinFitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}
