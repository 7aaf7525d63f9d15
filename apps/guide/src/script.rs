//! Screen scripts: the elements a screen registers, in mount order.

use std::{fs, io, path::Path};

use serde::Deserialize;
use shared::domain::RegisteredElement;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to read screen script '{path}': {source}")]
    Read { path: String, source: io::Error },
    #[error("invalid screen script: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScreenScript {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub elements: Vec<RegisteredElement>,
}

impl ScreenScript {
    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let raw = fs::read_to_string(path).map_err(|source| ScriptError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ScriptError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or("untitled screen")
    }
}
