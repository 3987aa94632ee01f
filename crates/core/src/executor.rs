//! Shared phase executor (spec §4.4): drives a release through the six
//! canonical phases using injected phase functions, persisting every
//! transition transactionally and classifying failures.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{Error, Result};
use crate::planner::{Plan, StepAction};
use crate::providers::{BuildOpts, EnsureInstalledOpts, EnsureJoinedOpts, Registries, RunOpts};
use crate::store::{Phase, PhaseStatus, ReleaseStore};

pub type PhaseFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A single phase's production logic. Takes an owned, cheaply cloneable
/// token and plan so implementations never have to fight lifetimes to
/// `tokio::spawn` sub-work or hold the plan across an `.await`.
pub trait PhaseFn: Send + Sync {
    fn call(&self, token: CancellationToken, plan: Arc<Plan>) -> PhaseFuture;
}

impl<F, Fut> PhaseFn for F
where
    F: Fn(CancellationToken, Arc<Plan>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn call(&self, token: CancellationToken, plan: Arc<Plan>) -> PhaseFuture {
        Box::pin(self(token, plan))
    }
}

/// Closed struct with exactly one function pointer per canonical phase
/// (spec §4.4): the executor can never introduce a phase identifier that
/// isn't a field here.
#[derive(Clone)]
pub struct PhaseFns {
    pub build: Arc<dyn PhaseFn>,
    pub push: Arc<dyn PhaseFn>,
    pub migrate_pre: Arc<dyn PhaseFn>,
    pub rollout: Arc<dyn PhaseFn>,
    pub migrate_post: Arc<dyn PhaseFn>,
    pub finalize: Arc<dyn PhaseFn>,
}

impl PhaseFns {
    fn get(&self, phase: Phase) -> &Arc<dyn PhaseFn> {
        match phase {
            Phase::Build => &self.build,
            Phase::Push => &self.push,
            Phase::MigratePre => &self.migrate_pre,
            Phase::Rollout => &self.rollout,
            Phase::MigratePost => &self.migrate_post,
            Phase::Finalize => &self.finalize,
        }
    }

    /// A `PhaseFns` where every phase is a no-op success, useful as a base
    /// for tests that only want to force a single phase to fail.
    pub fn noop() -> Self {
        fn ok(_: CancellationToken, _: Arc<Plan>) -> PhaseFuture {
            Box::pin(async { Ok(()) })
        }
        Self {
            build: Arc::new(ok as fn(CancellationToken, Arc<Plan>) -> PhaseFuture),
            push: Arc::new(ok as fn(CancellationToken, Arc<Plan>) -> PhaseFuture),
            migrate_pre: Arc::new(ok as fn(CancellationToken, Arc<Plan>) -> PhaseFuture),
            rollout: Arc::new(ok as fn(CancellationToken, Arc<Plan>) -> PhaseFuture),
            migrate_post: Arc::new(ok as fn(CancellationToken, Arc<Plan>) -> PhaseFuture),
            finalize: Arc::new(ok as fn(CancellationToken, Arc<Plan>) -> PhaseFuture),
        }
    }
}

/// Compose the production `PhaseFns` over the four provider registries
/// (spec §4.4: "production code uses a default record that composes
/// operations over the provider registries").
///
/// The provider contracts in spec §4.1 are deliberately minimal (Backend
/// has no distinct "push" or "apply" operation, Cloud only provisions
/// infrastructure). This composition maps the six lifecycle phases onto
/// that fixed surface rather than inventing new provider methods:
///
/// - `build`: `Backend::build_docker` for every `Build` step.
/// - `push`: no dedicated provider operation exists in v1; `BuildDocker`
///   already returns a publishable image reference, so this phase is a
///   structural no-op retained as its own release-history checkpoint.
/// - `migrate_pre` / `migrate_post`: `MigrationEngine::run` for `Migrate`
///   steps whose strategy matches the phase.
/// - `rollout`: `Cloud::plan` + `apply` for every `Create` step (the
///   infra-provisioning step the planner emits when a cloud provider is
///   configured), then `Network::ensure_installed` + `ensure_joined` for
///   every host touched by a non-migration, non-health-check step, readying
///   the mesh connectivity the overview describes as how services go live.
///   Provisioning runs before network join because the hosts a `Create`
///   step introduces must exist before anything can join them to the mesh.
/// - `finalize`: no dedicated provider operation; release bookkeeping only.
pub fn default_phase_fns(registries: Arc<Registries>) -> PhaseFns {
    PhaseFns {
        build: build_phase_fn(registries.clone()),
        push: Arc::new(|_: CancellationToken, _: Arc<Plan>| -> PhaseFuture { Box::pin(async { Ok(()) }) }),
        migrate_pre: migrate_phase_fn(registries.clone(), crate::manifest::MigrationStrategy::PreDeploy),
        rollout: rollout_phase_fn(registries.clone()),
        migrate_post: migrate_phase_fn(registries, crate::manifest::MigrationStrategy::PostDeploy),
        finalize: Arc::new(|_: CancellationToken, _: Arc<Plan>| -> PhaseFuture { Box::pin(async { Ok(()) }) }),
    }
}

fn build_phase_fn(registries: Arc<Registries>) -> Arc<dyn PhaseFn> {
    Arc::new(move |token: CancellationToken, plan: Arc<Plan>| -> PhaseFuture {
        let registries = registries.clone();
        Box::pin(async move {
            for step in plan.steps.iter().filter(|s| s.action == StepAction::Build) {
                let backend = registries.backend.get(&step.target.provider)?;
                let opts = BuildOpts {
                    environment: step.inputs.environment.clone().unwrap_or_default(),
                    config: None,
                };
                backend.build_docker(&token, opts).await?;
            }
            Ok(())
        })
    })
}

fn migrate_phase_fn(registries: Arc<Registries>, strategy: crate::manifest::MigrationStrategy) -> Arc<dyn PhaseFn> {
    Arc::new(move |token: CancellationToken, plan: Arc<Plan>| -> PhaseFuture {
        let registries = registries.clone();
        Box::pin(async move {
            for step in plan.steps.iter().filter(|s| s.action == StepAction::Migrate) {
                if step.inputs.strategy != Some(strategy) {
                    continue;
                }
                let engine = registries.migration.get(&step.target.provider)?;
                let connection_env = step.inputs.conn_env.clone().unwrap_or_default();
                let opts = RunOpts {
                    database: step.inputs.database.clone().unwrap_or_default(),
                    path: step.inputs.path.clone().unwrap_or_default(),
                    connection_env,
                    config: None,
                };
                let report = engine.run(&token, opts).await?;
                if !report.all_succeeded() {
                    return Err(Error::new(
                        crate::error::ErrorKind::ProviderFailure,
                        format!("migration `{}` reported a failed step", step.target.name),
                    ));
                }
            }
            Ok(())
        })
    })
}

fn rollout_phase_fn(registries: Arc<Registries>) -> Arc<dyn PhaseFn> {
    Arc::new(move |token: CancellationToken, plan: Arc<Plan>| -> PhaseFuture {
        let registries = registries.clone();
        Box::pin(async move {
            for step in plan.steps.iter().filter(|s| s.action == StepAction::Create) {
                let cloud = registries.cloud.get(&step.target.provider)?;
                let cloud_plan = cloud.plan(&token, &step.target.name).await?;
                cloud.apply(&token, &cloud_plan).await?;
            }

            let mut hosts: Vec<&str> = plan
                .steps
                .iter()
                .filter(|s| matches!(s.action, StepAction::ApplyCompose | StepAction::Create))
                .map(|s| s.host.as_str())
                .collect();
            hosts.sort_unstable();
            hosts.dedup();

            for host in hosts {
                for network in all_networks(&registries) {
                    network.ensure_installed(&token, EnsureInstalledOpts::default()).await?;
                    network
                        .ensure_joined(&token, EnsureJoinedOpts { host: host.to_string(), tags: Vec::new() })
                        .await?;
                }
            }
            Ok(())
        })
    })
}

/// All registered network providers, in registration-ID order. Rollout
/// joins every one rather than a single named provider because the plan
/// does not currently carry a network-provider selection per step.
fn all_networks(registries: &Registries) -> Vec<Arc<dyn crate::providers::Network>> {
    registries.network.ids().iter().filter_map(|id| registries.network.get(id).ok()).collect()
}

pub struct PhaseExecutor<'a> {
    store: &'a ReleaseStore,
    fns: PhaseFns,
}

impl<'a> PhaseExecutor<'a> {
    pub fn new(store: &'a ReleaseStore, fns: PhaseFns) -> Self {
        Self { store, fns }
    }

    /// Drive `release_id` through all six canonical phases in order.
    /// Returns the first phase failure, if any, already wrapped per spec §7
    /// (`phase {name} failed: {cause}`).
    pub async fn run(&self, token: &CancellationToken, release_id: &str, plan: &Plan) -> Result<()> {
        let plan = Arc::new(plan.clone());
        for phase in Phase::ALL {
            let span = tracing::info_span!("phase", release_id, %phase);
            let outcome = self.run_phase(token, release_id, phase, plan.clone()).instrument(span).await;
            match outcome {
                Ok(()) => continue,
                // A store write itself failed (spec §4.4: "every UpdatePhase
                // failure is fatal"): abort immediately, no further store
                // calls of any kind.
                Err(PhaseRunError::StoreWrite(err)) => return Err(err),
                // The phase function failed and its own Failed status was
                // already persisted: sweep downstream phases to Skipped on a
                // best-effort basis. A failure in that sweep must never
                // override the phase failure the caller asked about.
                Err(PhaseRunError::PhaseFailed(err)) => {
                    if let Err(sweep_err) = self.skip_downstream(token, release_id, phase).await {
                        tracing::warn!(release_id, %phase, error = %sweep_err, "failed to mark downstream phases skipped");
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    async fn run_phase(
        &self,
        token: &CancellationToken,
        release_id: &str,
        phase: Phase,
        plan: Arc<Plan>,
    ) -> std::result::Result<(), PhaseRunError> {
        self.store
            .update_phase(token, release_id, phase, PhaseStatus::Running)
            .await
            .map_err(PhaseRunError::StoreWrite)?;

        let result = self.fns.get(phase).call(token.clone(), plan).await;

        match result {
            Ok(()) => {
                self.store
                    .update_phase(token, release_id, phase, PhaseStatus::Completed)
                    .await
                    .map_err(PhaseRunError::StoreWrite)?;
                Ok(())
            }
            Err(cause) => {
                self.store
                    .update_phase(token, release_id, phase, PhaseStatus::Failed)
                    .await
                    .map_err(PhaseRunError::StoreWrite)?;
                Err(PhaseRunError::PhaseFailed(Error::phase_failed(phase, cause)))
            }
        }
    }

    async fn skip_downstream(&self, token: &CancellationToken, release_id: &str, failed: Phase) -> Result<()> {
        for downstream in failed.downstream() {
            self.store.update_phase(token, release_id, *downstream, PhaseStatus::Skipped).await?;
        }
        Ok(())
    }
}

/// Distinguishes why [`PhaseExecutor::run_phase`] failed, so the caller
/// never mistakes a store write failure for a phase function failure (or
/// vice versa): only the latter should trigger the downstream skip sweep.
enum PhaseRunError {
    PhaseFailed(Error),
    StoreWrite(Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{EnvironmentOverlay, Manifest, ProjectMeta, ProviderSelection};
    use crate::store::testing::isolated_store;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manifest() -> Manifest {
        let mut environments = BTreeMap::new();
        environments.insert("prod".to_string(), EnvironmentOverlay::default());
        Manifest {
            project: ProjectMeta { name: "demo".to_string(), registry_url: None },
            backend: ProviderSelection { provider: "docker-compose".to_string(), providers: BTreeMap::new() },
            frontend: None,
            network: ProviderSelection { provider: "tailscale".to_string(), providers: BTreeMap::new() },
            cloud: None,
            secrets: None,
            hosts: BTreeMap::new(),
            services: BTreeMap::new(),
            databases: BTreeMap::new(),
            environments,
        }
    }

    fn failing(label: &'static str) -> Arc<dyn PhaseFn> {
        Arc::new(move |_: CancellationToken, _: Arc<Plan>| -> PhaseFuture {
            let msg = format!("{label} exploded");
            Box::pin(async move { Err(Error::new(crate::error::ErrorKind::ProviderFailure, msg)) })
        })
    }

    fn counting(counter: Arc<AtomicUsize>) -> Arc<dyn PhaseFn> {
        Arc::new(move |_: CancellationToken, _: Arc<Plan>| -> PhaseFuture {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn happy_path_completes_every_phase_in_order() {
        let harness = isolated_store(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let token = CancellationToken::new();
        let release = harness.store.create_release(&token, "prod", "v1", "").await.unwrap();
        let plan = crate::planner::plan(&manifest(), "prod").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let fns = PhaseFns {
            build: counting(calls.clone()),
            push: counting(calls.clone()),
            migrate_pre: counting(calls.clone()),
            rollout: counting(calls.clone()),
            migrate_post: counting(calls.clone()),
            finalize: counting(calls.clone()),
        };

        let executor = PhaseExecutor::new(&harness.store, fns);
        executor.run(&token, &release.id, &plan).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        let finished = harness.store.get_release(&token, &release.id).await.unwrap();
        assert!(finished.phases.values().all(|s| *s == PhaseStatus::Completed));
    }

    async fn run_with_failure_at(failed_phase: Phase) -> crate::store::Release {
        let harness = isolated_store(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let token = CancellationToken::new();
        let release = harness.store.create_release(&token, "prod", "v1", "").await.unwrap();
        let plan = crate::planner::plan(&manifest(), "prod").unwrap();

        let mut fns = PhaseFns::noop();
        let failing_fn = failing("boom");
        match failed_phase {
            Phase::Build => fns.build = failing_fn,
            Phase::Push => fns.push = failing_fn,
            Phase::MigratePre => fns.migrate_pre = failing_fn,
            Phase::Rollout => fns.rollout = failing_fn,
            Phase::MigratePost => fns.migrate_post = failing_fn,
            Phase::Finalize => fns.finalize = failing_fn,
        }

        let executor = PhaseExecutor::new(&harness.store, fns);
        let err = executor.run(&token, &release.id, &plan).await.unwrap_err();
        assert!(err.to_string().contains(&failed_phase.to_string()));

        harness.store.get_release(&token, &release.id).await.unwrap()
    }

    #[tokio::test]
    async fn failure_in_rollout_matches_scenario_three() {
        let release = run_with_failure_at(Phase::Rollout).await;
        assert_eq!(release.phases[&Phase::Build], PhaseStatus::Completed);
        assert_eq!(release.phases[&Phase::Push], PhaseStatus::Completed);
        assert_eq!(release.phases[&Phase::MigratePre], PhaseStatus::Completed);
        assert_eq!(release.phases[&Phase::Rollout], PhaseStatus::Failed);
        assert_eq!(release.phases[&Phase::MigratePost], PhaseStatus::Skipped);
        assert_eq!(release.phases[&Phase::Finalize], PhaseStatus::Skipped);
    }

    #[tokio::test]
    async fn each_phase_individually_fails_cleanly() {
        for phase in Phase::ALL {
            let release = run_with_failure_at(phase).await;
            for upstream in Phase::ALL.iter().take_while(|p| **p != phase) {
                assert_eq!(release.phases[upstream], PhaseStatus::Completed, "phase {upstream} should be completed");
            }
            assert_eq!(release.phases[&phase], PhaseStatus::Failed);
            for downstream in phase.downstream() {
                assert_eq!(release.phases[downstream], PhaseStatus::Skipped, "phase {downstream} should be skipped");
            }
        }
    }

    #[tokio::test]
    async fn default_phase_fns_build_surfaces_unregistered_provider() {
        let plan = crate::planner::plan(&manifest(), "prod").unwrap();
        let fns = default_phase_fns(Arc::new(Registries::default()));
        let err = fns.build.call(CancellationToken::new(), Arc::new(plan)).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn default_phase_fns_push_and_finalize_are_noops() {
        let plan = Arc::new(crate::planner::plan(&manifest(), "prod").unwrap());
        let fns = default_phase_fns(Arc::new(Registries::default()));
        fns.push.call(CancellationToken::new(), plan.clone()).await.unwrap();
        fns.finalize.call(CancellationToken::new(), plan).await.unwrap();
    }

    struct FakeCloud {
        apply_calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl crate::providers::Cloud for FakeCloud {
        fn id(&self) -> &str {
            "aws"
        }

        async fn plan(
            &self,
            _token: &CancellationToken,
            environment: &str,
        ) -> Result<crate::providers::CloudPlan> {
            Ok(crate::providers::CloudPlan { environment: environment.to_string(), hosts: Vec::new() })
        }

        async fn apply(&self, _token: &CancellationToken, _plan: &crate::providers::CloudPlan) -> Result<()> {
            self.apply_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn default_phase_fns_rollout_provisions_cloud_infra_before_network_join() {
        let mut manifest = manifest();
        manifest.cloud = Some(ProviderSelection { provider: "aws".to_string(), providers: BTreeMap::new() });
        let plan = Arc::new(crate::planner::plan(&manifest, "prod").unwrap());

        let registries = Registries::default();
        let apply_calls = Arc::new(AtomicUsize::new(0));
        registries.cloud.register("aws", Arc::new(FakeCloud { apply_calls: apply_calls.clone() }));

        let fns = default_phase_fns(Arc::new(registries));
        fns.rollout.call(CancellationToken::new(), plan).await.unwrap();
        assert_eq!(apply_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_any_phase_work() {
        let harness = isolated_store(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let token = CancellationToken::new();
        let release = harness.store.create_release(&token, "prod", "v1", "").await.unwrap();
        let plan = crate::planner::plan(&manifest(), "prod").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let fns = PhaseFns {
            build: counting(calls.clone()),
            push: counting(calls.clone()),
            migrate_pre: counting(calls.clone()),
            rollout: counting(calls.clone()),
            migrate_post: counting(calls.clone()),
            finalize: counting(calls.clone()),
        };
        let executor = PhaseExecutor::new(&harness.store, fns);

        token.cancel();
        let err = executor.run(&token, &release.id, &plan).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
