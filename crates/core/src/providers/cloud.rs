use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::registry::Registry;

/// A pure, side-effect-free description of the infrastructure changes a
/// cloud provider would apply. Output is sorted by logical host name so
/// the hash is idempotent (spec §4.1).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudPlan {
    pub environment: String,
    pub hosts: Vec<CloudHostPlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudHostPlan {
    pub host: String,
    pub action: CloudAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CloudAction {
    Create,
    Update,
    Delete,
    Noop,
}

/// Cloud/infrastructure provisioning provider (spec §4.1).
#[async_trait]
pub trait Cloud: Send + Sync {
    fn id(&self) -> &str;

    /// Pure preview; output sorted by logical host name (spec §4.1).
    async fn plan(&self, token: &CancellationToken, environment: &str) -> Result<CloudPlan>;

    /// Apply a previously computed plan. Idempotent: an already-existing
    /// create or an already-deleted delete is success, not an error.
    async fn apply(&self, token: &CancellationToken, plan: &CloudPlan) -> Result<()>;
}

pub type CloudRegistry = Registry<dyn Cloud>;

impl CloudPlan {
    /// Sort hosts by logical name; `Cloud::plan` implementations should
    /// call this before returning so the plan is idempotent/hashable.
    pub fn sorted(mut self) -> Self {
        self.hosts.sort_by(|a, b| a.host.cmp(&b.host));
        self
    }
}
