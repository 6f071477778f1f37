//! # World Configuration
//!
//! Loaded once at startup from TOML. Every field has a default so an empty
//! file (or no file at all) yields a usable world.
//!
//! ```toml
//! label = "gameplay"
//! initial_capacity = 4096
//! max_hierarchy_depth = 64
//! warn_on_stale_handles = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{WorldError, WorldResult};

/// Tunables for a [`World`](crate::World).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Name attached to diagnostics emitted by this world.
    pub label: String,
    /// Entity slots reserved up front.
    pub initial_capacity: usize,
    /// Deepest transform chain `set_parent` will build.
    pub max_hierarchy_depth: usize,
    /// Log no-ops caused by invalid handles at `warn` instead of `trace`.
    pub warn_on_stale_handles: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            label: "world".to_owned(),
            initial_capacity: 1024,
            max_hierarchy_depth: 256,
            warn_on_stale_handles: false,
        }
    }
}

impl WorldConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::Config`] if the text is not valid TOML or a
    /// field has the wrong type.
    pub fn from_toml_str(text: &str) -> WorldResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| WorldError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::Config`] if the file cannot be read or parsed.
    pub fn from_toml_file(path: impl AsRef<Path>) -> WorldResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| WorldError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> WorldResult<()> {
        if self.max_hierarchy_depth == 0 {
            return Err(WorldError::Config(
                "max_hierarchy_depth must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}
