//! Top-level release lifecycle (spec §4.4, §6): wires the resolver, the
//! planner, the store, and the executor into the single operation a CLI
//! collaborator actually needs, including the dry-run short-circuit.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::executor::{PhaseExecutor, PhaseFns};
use crate::manifest::Manifest;
use crate::planner::{self, Plan};
use crate::resolver::EnvResolver;
use crate::store::{Release, ReleaseStore};

/// What a caller supplies to deploy a release (spec §6 "command-surface
/// contracts"): environment name, optional explicit version/commit, and a
/// dry-run flag that strictly short-circuits before any mutation.
#[derive(Debug, Clone, Default)]
pub struct DeployRequest {
    pub environment: String,
    pub version: String,
    pub commit_sha: String,
    pub dry_run: bool,
}

/// The outcome of [`run_release`]: either a dry-run preview (no release
/// created) or a release that was driven through the executor.
#[derive(Debug)]
pub enum DeployOutcome {
    DryRun { plan: Plan },
    Executed { release: Release, plan: Plan },
}

/// Compile the plan, and — unless `request.dry_run` — create a release and
/// drive it through every phase. Dry-run never touches the store or the
/// executor (spec §4.4 invariant: "must not create or mutate any release").
pub async fn run_release(
    token: &CancellationToken,
    manifest: &Manifest,
    store: &ReleaseStore,
    phase_fns: PhaseFns,
    request: DeployRequest,
) -> Result<DeployOutcome> {
    // Resolution is performed for its validation side effect (an unknown
    // environment must fail before planning); the merged variables
    // themselves are consumed by the default phase functions' providers,
    // not by this orchestration layer.
    let _resolved = EnvResolver::new(manifest).resolve(&request.environment).await?;
    let plan = planner::plan(manifest, &request.environment)?;

    if request.dry_run {
        return Ok(DeployOutcome::DryRun { plan });
    }

    let release = store.create_release(token, &request.environment, &request.version, &request.commit_sha).await?;
    let executor = PhaseExecutor::new(store, phase_fns);
    executor.run(token, &release.id, &plan).await?;

    let release = store.get_release(token, &release.id).await?;
    Ok(DeployOutcome::Executed { release, plan })
}

/// Convenience for callers that only want the compiled plan (e.g. a `plan`
/// CLI subcommand), with no store or executor involvement at all.
pub fn plan_only(manifest: &Manifest, environment: &str) -> Result<Plan> {
    planner::plan(manifest, environment)
}

/// The release a rollback of `release_id` would restore (spec's "durable
/// release history that enables rollback and inspection"): the release
/// named by `previous_id`. This only looks up history; it never mutates
/// the store or re-runs any phase (automatic rollback is a non-goal).
pub async fn rollback_target(
    token: &CancellationToken,
    store: &ReleaseStore,
    release_id: &str,
) -> Result<Release> {
    let release = store.get_release(token, release_id).await?;
    if release.previous_id.is_empty() {
        return Err(crate::error::Error::release_not_found(format!(
            "<no release prior to `{release_id}`>"
        )));
    }
    store.get_release(token, &release.previous_id).await
}

pub type SharedPhaseFns = Arc<PhaseFns>;
