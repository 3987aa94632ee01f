use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::manifest::ProviderConfig;
use crate::registry::Registry;

#[derive(Debug, Clone, Default)]
pub struct PlanOpts {
    pub database: String,
    pub path: String,
    pub config: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct RunOpts {
    pub database: String,
    pub path: String,
    pub connection_env: String,
    pub config: Option<ProviderConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    pub id: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepOutcome {
    Applied,
    AlreadyApplied,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationStepReport {
    pub migration_id: String,
    pub outcome: StepOutcome,
}

/// Ordered, stable report of a migration run (spec §4.1).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub steps: Vec<MigrationStepReport>,
}

impl ApplyReport {
    pub fn all_succeeded(&self) -> bool {
        self.steps.iter().all(|s| s.outcome != StepOutcome::Failed)
    }
}

/// Database migration-engine provider (spec §4.1).
#[async_trait]
pub trait MigrationEngine: Send + Sync {
    fn id(&self) -> &str;

    /// Read-only: list pending migrations.
    async fn plan(&self, token: &CancellationToken, opts: PlanOpts) -> Result<Vec<Migration>>;

    /// Mutating: apply pending migrations, returning an ordered report.
    async fn run(&self, token: &CancellationToken, opts: RunOpts) -> Result<ApplyReport>;
}

pub type MigrationRegistry = Registry<dyn MigrationEngine>;
