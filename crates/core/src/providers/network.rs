use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::registry::Registry;

#[derive(Debug, Clone, Default)]
pub struct EnsureInstalledOpts {
    /// Minimum acceptable version, if the network client should be checked
    /// (not just installed).
    pub min_version: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EnsureJoinedOpts {
    pub host: String,
    pub tags: Vec<String>,
}

/// Mesh-network provider (spec §4.1): install/join the overlay network and
/// resolve logical host names to fully-qualified node names.
#[async_trait]
pub trait Network: Send + Sync {
    fn id(&self) -> &str;

    /// Idempotent install, optionally enforcing a minimum version.
    async fn ensure_installed(&self, token: &CancellationToken, opts: EnsureInstalledOpts) -> Result<()>;

    /// Reconcile membership and tag set for `opts.host` (spec §9 fixes the
    /// reconciliation decisions; this trait exposes the operation only).
    async fn ensure_joined(&self, token: &CancellationToken, opts: EnsureJoinedOpts) -> Result<()>;

    /// Pure: resolve a logical host name to its mesh FQDN.
    fn node_fqdn(&self, host: &str) -> Result<String>;
}

pub type NetworkRegistry = Registry<dyn Network>;
