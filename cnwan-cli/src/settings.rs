//! `~/.cnwan/settings.yaml`: broker and store configuration.
//!
//! Every field is optional in the file; missing fields (or a missing file at
//! the default location) fall back to [`Settings::default`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use cnwan_core::{FileRegistry, OwnershipTag};
use cnwan_sync::{BackendContext, BrokerSettings};

pub const DEFAULT_OWNER_KEY: &str = "owner";
pub const DEFAULT_OWNER_VALUE: &str = "cnwan";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub owner_key: String,
    pub owner_value: String,
    /// Per registry call, in seconds. Zero or negative means 30.
    pub timeout_secs: i64,
    pub project: Option<String>,
    pub region: Option<String>,
    /// Root of the local YAML registry. Defaults to `~/.cnwan/registry`.
    pub store_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            owner_key: DEFAULT_OWNER_KEY.to_string(),
            owner_value: DEFAULT_OWNER_VALUE.to_string(),
            timeout_secs: 30,
            project: None,
            region: None,
            store_dir: None,
        }
    }
}

impl Settings {
    /// `<home>/.cnwan/settings.yaml`
    pub fn default_path_at(home: &Path) -> PathBuf {
        home.join(".cnwan").join("settings.yaml")
    }

    /// Load from `explicit` if given (must exist), else from the default
    /// location if present, else defaults.
    pub fn load_at(home: &Path, explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = Self::default_path_at(home);
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read settings at {}", path.display()))?;
        let settings: Settings = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse settings at {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.owner_key.is_empty(), "owner_key must not be empty");
        anyhow::ensure!(!self.owner_value.is_empty(), "owner_value must not be empty");
        Ok(())
    }

    pub fn ownership(&self) -> OwnershipTag {
        OwnershipTag::new(&self.owner_key, &self.owner_value)
    }

    pub fn broker_settings(&self) -> BrokerSettings {
        BrokerSettings {
            ownership: self.ownership(),
            timeout_secs: self.timeout_secs,
            context: BackendContext {
                project: self.project.clone(),
                region: self.region.clone(),
            },
        }
    }

    pub fn store_root(&self, home: &Path) -> PathBuf {
        self.store_dir
            .clone()
            .unwrap_or_else(|| FileRegistry::default_root_at(home))
    }
}
