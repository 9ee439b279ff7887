//! XML-backed configuration store.
//!
//! Split into [`types`] (the serde structs mirroring the `<config>`
//! document) and [`validation`] (startup checks). The file is read once at
//! startup and rewritten whole on every change.

mod types;
mod validation;

pub use types::{Automatic, Config, Defaults, ServerConfig, Servers};
pub use validation::validate;

use crate::error::ConfigError;
use std::path::Path;

impl Config {
    /// Load and parse the configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        quick_xml::de::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Serialize and rewrite the whole file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let body = quick_xml::se::to_string(self)?;
        let document = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{body}");
        std::fs::write(path, document).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }
}
