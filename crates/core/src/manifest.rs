//! Typed, in-memory representation of the project manifest (spec §3, §6).
//!
//! The manifest is immutable once loaded and is passed by reference to the
//! planner and the environment resolver. Parsing here is deliberately
//! shallow: it decodes the fixed shape spec §6 fixes, it does not perform
//! deep schema validation (that is an external collaborator's job).

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Opaque per-provider configuration blob. The engine never interprets
/// these; only the provider implementation parses its own entry.
pub type ProviderConfig = serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMeta {
    pub name: String,
    #[serde(default)]
    pub registry_url: Option<String>,
}

/// `<category>.provider` plus `<category>.providers.<id>` (spec §4.1, §6).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProviderSelection {
    pub provider: String,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl ProviderSelection {
    /// The opaque config blob for the selected provider, if one was supplied.
    pub fn selected_config(&self) -> Option<&ProviderConfig> {
        self.providers.get(&self.provider)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MigrationStrategy {
    PreDeploy,
    PostDeploy,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseDef {
    /// Registered migration-engine provider ID.
    pub engine: String,
    /// Path to migration sources, relative to the manifest.
    pub path: String,
    pub strategy: MigrationStrategy,
    /// Name of the environment variable carrying the connection string.
    pub connection_env: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnvironmentOverlay {
    #[serde(default)]
    pub env_file: Option<PathBuf>,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSelection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub project: ProjectMeta,
    pub backend: ProviderSelection,
    #[serde(default)]
    pub frontend: Option<ProviderSelection>,
    pub network: ProviderSelection,
    #[serde(default)]
    pub cloud: Option<ProviderSelection>,
    #[serde(default)]
    pub secrets: Option<ProviderSelection>,
    /// role -> ordered logical host names.
    #[serde(default)]
    pub hosts: BTreeMap<String, Vec<String>>,
    /// service name -> role.
    #[serde(default)]
    pub services: BTreeMap<String, String>,
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseDef>,
    pub environments: BTreeMap<String, EnvironmentOverlay>,
}

impl Manifest {
    /// Decode a manifest from YAML. This is a plain structural decode, not a
    /// schema validator: malformed YAML or a field of the wrong shape
    /// surfaces as `ErrorKind::Validation`.
    pub fn from_yaml(source: &str) -> Result<Self> {
        serde_yaml::from_str(source).map_err(Error::from)
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(Error::from)?;
        Self::from_yaml(&content)
    }

    pub fn environment(&self, name: &str) -> Result<&EnvironmentOverlay> {
        self.environments
            .get(name)
            .ok_or_else(|| Error::validation(format!("unknown environment: {name}")))
    }

    /// Databases matching the given strategy, in lexicographic name order
    /// (spec §4.3 step 2).
    pub fn databases_with_strategy(
        &self,
        strategy: MigrationStrategy,
    ) -> impl Iterator<Item = (&String, &DatabaseDef)> {
        self.databases.iter().filter(move |(_, db)| db.strategy == strategy)
    }
}
