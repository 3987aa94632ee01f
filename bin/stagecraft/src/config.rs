//! Small layered CLI config (spec §4.2/§6 state-file precedence is owned by
//! `stagecraft-core`; this layer only adds a file-based override point on
//! top of it, the way the teacher layers `figment` over CLI flags).

use std::path::PathBuf;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagecraftConfig {
    /// Overrides `stagecraft-core`'s default state-file path when set.
    pub state_file: Option<PathBuf>,
}

impl Default for StagecraftConfig {
    fn default() -> Self {
        Self { state_file: None }
    }
}

impl StagecraftConfig {
    /// Layer defaults, an optional TOML file, then `STAGECRAFT_`-prefixed
    /// environment variables (highest precedence).
    pub fn load(config_path: Option<&PathBuf>) -> anyhow::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(StagecraftConfig::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("STAGECRAFT_"));
        Ok(figment.extract()?)
    }
}
