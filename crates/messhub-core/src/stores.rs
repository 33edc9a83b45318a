use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Registration record for one application state container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub name: String,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub persist_state: bool,
}

impl StoreConfig {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            critical: false,
            dependencies: Vec::new(),
            persist_state: false,
        }
    }

    #[must_use]
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    #[must_use]
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for dep in deps {
            let dep = dep.into();
            // dependencies behave as an ordered set
            if !self.dependencies.contains(&dep) {
                self.dependencies.push(dep);
            }
        }
        self
    }

    #[must_use]
    pub fn persisted(mut self) -> Self {
        self.persist_state = true;
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct StoreManifest {
    pub stores: Vec<StoreConfig>,
}

/// Load and validate the store manifest from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_store_manifest(path: &Path) -> Result<StoreManifest, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ManifestIo {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_store_manifest(&content)
}

/// Parse and validate a store manifest from YAML text.
///
/// # Errors
///
/// Returns `ConfigError` if the text does not parse or fails validation.
pub fn parse_store_manifest(content: &str) -> Result<StoreManifest, ConfigError> {
    let manifest: StoreManifest = serde_yaml::from_str(content)?;
    validate_manifest(&manifest)?;
    Ok(manifest)
}

fn validate_manifest(manifest: &StoreManifest) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for store in &manifest.stores {
        if store.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "store name must be non-empty".to_string(),
            ));
        }
        if !seen.insert(store.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate store name: '{}'",
                store.name
            )));
        }
    }

    for store in &manifest.stores {
        if let Some(missing) = store
            .dependencies
            .iter()
            .find(|dep| !seen.contains(dep.as_str()))
        {
            return Err(ConfigError::Validation(format!(
                "store '{}' depends on unknown store '{missing}'",
                store.name
            )));
        }
    }

    Ok(())
}
