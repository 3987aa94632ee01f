use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::manifest::ProviderConfig;
use crate::registry::Registry;

#[derive(Debug, Clone, Default)]
pub struct DevOpts {
    pub environment: String,
    pub config: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildOpts {
    pub environment: String,
    pub config: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct PlanOpts {
    pub environment: String,
    pub config: Option<ProviderConfig>,
}

/// A pure, side-effect-free preview of what `BuildDocker`/`Dev` would do.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderPlan {
    pub summary: String,
    pub actions: Vec<String>,
}

/// Build-system/application-runtime provider (spec §4.1).
#[async_trait]
pub trait Backend: Send + Sync {
    fn id(&self) -> &str;

    /// Run a local development loop. Long-running; observes `token`.
    async fn dev(&self, token: &CancellationToken, opts: DevOpts) -> Result<()>;

    /// Build a container image, returning its image reference.
    async fn build_docker(&self, token: &CancellationToken, opts: BuildOpts) -> Result<String>;

    /// Pure preview of what building/running would do; no side effects.
    async fn plan(&self, token: &CancellationToken, opts: PlanOpts) -> Result<ProviderPlan>;
}

pub type BackendRegistry = Registry<dyn Backend>;
