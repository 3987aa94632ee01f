//! Pure compilation of (manifest, environment) into a deterministic,
//! content-addressed [`Plan`] (spec §4.3).
//!
//! The planner performs no I/O and invokes no providers; every decision is a
//! function of the manifest and environment name alone.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::manifest::{Manifest, MigrationStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepAction {
    Build,
    ApplyCompose,
    Migrate,
    HealthCheck,
    Create,
    Noop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub kind: String,
    pub name: String,
    pub provider: String,
}

/// Closed, typed input record (spec §4.3 step 7): no free-form maps, so
/// `serde_json` always emits the same key order for equal inputs regardless
/// of insertion history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInputs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<MigrationStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conn_env: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub index: u32,
    pub action: StepAction,
    pub target: Target,
    pub host: String,
    pub inputs: StepInputs,
    /// Sibling step IDs this step depends on, lexicographically sorted.
    pub dependencies: Vec<String>,
}

/// Schema version of the plan encoding; bump when the wire shape changes in
/// a way that would change hashes for unchanged inputs.
pub const PLAN_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub schema_version: u32,
    pub plan_id: String,
    pub environment: String,
    pub summary: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// Internal, pre-ID-assignment representation of a single operation the
/// planner wants to emit (spec §4.3 step 2).
struct Operation {
    id: String,
    action: StepAction,
    target: Target,
    host: String,
    inputs: StepInputs,
    dependencies: Vec<String>,
}

/// Pick the step host per spec §3 ("local" when single-host): if the
/// manifest names at most one distinct host across all roles, every step
/// runs on "local"; otherwise the lexicographically first named host is
/// used as the default placement target (open area left by spec §9; hosts
/// beyond the default would need an explicit per-service host assignment
/// the manifest schema does not yet carry).
fn primary_host(manifest: &Manifest) -> String {
    let mut hosts: Vec<&str> =
        manifest.hosts.values().flatten().map(|s| s.as_str()).collect();
    hosts.sort_unstable();
    hosts.dedup();
    match hosts.as_slice() {
        [] | [_] => "local".to_string(),
        [first, ..] => first.to_string(),
    }
}

fn migration_op(
    db_name: &str,
    db: &crate::manifest::DatabaseDef,
    host: &str,
) -> Operation {
    Operation {
        id: format!("migrate-{db_name}-{}", db.strategy),
        action: StepAction::Migrate,
        target: Target {
            kind: "database".to_string(),
            name: db_name.to_string(),
            provider: db.engine.clone(),
        },
        host: host.to_string(),
        inputs: StepInputs {
            database: Some(db_name.to_string()),
            strategy: Some(db.strategy),
            engine: Some(db.engine.clone()),
            path: Some(db.path.clone()),
            conn_env: Some(db.connection_env.clone()),
            ..Default::default()
        },
        dependencies: Vec::new(),
    }
}

fn build_op(category: &str, provider: &str, environment: &str, host: &str) -> Operation {
    Operation {
        id: format!("build-{category}"),
        action: StepAction::Build,
        target: Target {
            kind: "image".to_string(),
            name: category.to_string(),
            provider: provider.to_string(),
        },
        host: host.to_string(),
        inputs: StepInputs {
            provider: Some(provider.to_string()),
            environment: Some(environment.to_string()),
            ..Default::default()
        },
        dependencies: Vec::new(),
    }
}

/// Compile `manifest` for `environment` into a deterministic [`Plan`]
/// (spec §4.3).
pub fn plan(manifest: &Manifest, environment: &str) -> Result<Plan> {
    manifest.environment(environment)?;

    let host = primary_host(manifest);
    let mut operations = Vec::new();

    // infra_provision, only when a cloud provider is configured (spec §9
    // open question, resolved: "no — emitted only when the manifest
    // requests it"). Placed first: nothing else can run before
    // infrastructure exists.
    let infra_id = if let Some(cloud) = &manifest.cloud {
        let op = Operation {
            id: format!("infra-{environment}"),
            action: StepAction::Create,
            target: Target {
                kind: "infrastructure".to_string(),
                name: environment.to_string(),
                provider: cloud.provider.clone(),
            },
            host: host.clone(),
            inputs: StepInputs {
                environment: Some(environment.to_string()),
                provider: Some(cloud.provider.clone()),
                ..Default::default()
            },
            dependencies: Vec::new(),
        };
        let id = op.id.clone();
        operations.push(op);
        Some(id)
    } else {
        None
    };

    // Pre-deploy migrations, lexicographic by database name.
    let pre_migration_ids: Vec<String> = manifest
        .databases_with_strategy(MigrationStrategy::PreDeploy)
        .map(|(name, db)| {
            let op = migration_op(name, db, &host);
            let id = op.id.clone();
            operations.push(op);
            id
        })
        .collect();

    // Builds: backend, then frontend if selected.
    let mut build_ids = Vec::new();
    {
        let op = build_op("backend", &manifest.backend.provider, environment, &host);
        build_ids.push(op.id.clone());
        operations.push(op);
    }
    if let Some(frontend) = &manifest.frontend {
        let op = build_op("frontend", &frontend.provider, environment, &host);
        build_ids.push(op.id.clone());
        operations.push(op);
    }

    // Deploy: one per environment, depends on builds + pre-deploy
    // migrations (+ infra, if provisioned).
    let mut deploy_deps = build_ids.clone();
    deploy_deps.extend(pre_migration_ids.iter().cloned());
    deploy_deps.extend(infra_id.iter().cloned());
    deploy_deps.sort();
    operations.push(Operation {
        id: format!("deploy-{environment}"),
        action: StepAction::ApplyCompose,
        target: Target {
            kind: "service".to_string(),
            name: environment.to_string(),
            provider: manifest.backend.provider.clone(),
        },
        host: host.clone(),
        inputs: StepInputs {
            environment: Some(environment.to_string()),
            provider: Some(manifest.backend.provider.clone()),
            ..Default::default()
        },
        dependencies: deploy_deps,
    });

    // Post-deploy migrations, lexicographic by database name.
    for (name, db) in manifest.databases_with_strategy(MigrationStrategy::PostDeploy) {
        operations.push(migration_op(name, db, &host));
    }

    // Health check: one per environment.
    operations.push(Operation {
        id: format!("health-check-{environment}"),
        action: StepAction::HealthCheck,
        target: Target {
            kind: "service".to_string(),
            name: environment.to_string(),
            provider: manifest.backend.provider.clone(),
        },
        host,
        inputs: StepInputs { environment: Some(environment.to_string()), ..Default::default() },
        dependencies: Vec::new(),
    });

    build_plan(environment, operations)
}

fn build_plan(environment: &str, operations: Vec<Operation>) -> Result<Plan> {
    let mut seen = std::collections::BTreeSet::new();
    let mut steps = Vec::with_capacity(operations.len());

    for (index, op) in operations.into_iter().enumerate() {
        if op.id.is_empty() {
            return Err(Error::internal("planner produced an empty step id"));
        }
        if !seen.insert(op.id.clone()) {
            return Err(Error::internal(format!("duplicate step id: {}", op.id)));
        }
        let mut dependencies = op.dependencies;
        dependencies.sort();
        steps.push(PlanStep {
            id: op.id,
            index: index as u32,
            action: op.action,
            target: op.target,
            host: op.host,
            inputs: op.inputs,
            dependencies,
        });
    }

    for step in &steps {
        for dep in &step.dependencies {
            if !seen.contains(dep) {
                return Err(Error::internal(format!(
                    "step `{}` depends on unknown step `{}`",
                    step.id, dep
                )));
            }
        }
    }

    let plan_id = compute_plan_id(environment, &steps)?;
    let summary = format!("{} step(s) for environment `{}`", steps.len(), environment);

    Ok(Plan { schema_version: PLAN_SCHEMA_VERSION, plan_id, environment: environment.to_string(), summary, steps })
}

#[derive(Serialize)]
struct HashInput<'a> {
    environment: &'a str,
    steps: &'a [PlanStep],
}

/// Hex encoding of the first 12 bytes of SHA-256 over the canonical JSON
/// encoding of `{environment, steps[]}` in ascending index order (spec
/// §4.3 step 8, §4.6). `PlanStep`/`StepInputs` are closed structs, so
/// `serde_json`'s declaration-order field serialization is already
/// canonical: there is no map iteration order to fight.
fn compute_plan_id(environment: &str, steps: &[PlanStep]) -> Result<String> {
    let payload = HashInput { environment, steps };
    let json = serde_json::to_vec(&payload)?;
    let mut hasher = Sha256::new();
    hasher.update(&json);
    let digest = hasher.finalize();
    Ok(hex::encode(&digest[..12]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{DatabaseDef, EnvironmentOverlay, Manifest, ProjectMeta, ProviderSelection};
    use std::collections::BTreeMap;

    fn manifest_with(databases: BTreeMap<String, DatabaseDef>, cloud: Option<ProviderSelection>) -> Manifest {
        let mut environments = BTreeMap::new();
        environments.insert("prod".to_string(), EnvironmentOverlay::default());
        Manifest {
            project: ProjectMeta { name: "demo".to_string(), registry_url: None },
            backend: ProviderSelection { provider: "docker-compose".to_string(), providers: BTreeMap::new() },
            frontend: None,
            network: ProviderSelection { provider: "tailscale".to_string(), providers: BTreeMap::new() },
            cloud,
            secrets: None,
            hosts: BTreeMap::new(),
            services: BTreeMap::new(),
            databases,
            environments,
        }
    }

    fn db(strategy: MigrationStrategy) -> DatabaseDef {
        DatabaseDef {
            engine: "sqlx".to_string(),
            path: "migrations".to_string(),
            strategy,
            connection_env: "DATABASE_URL".to_string(),
        }
    }

    #[test]
    fn unknown_environment_fails_validation() {
        let manifest = manifest_with(BTreeMap::new(), None);
        let err = plan(&manifest, "staging").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn scenario_one_single_env_first_release_step_order() {
        let mut databases = BTreeMap::new();
        databases.insert("primary".to_string(), db(MigrationStrategy::PreDeploy));
        let manifest = manifest_with(databases, None);

        let p = plan(&manifest, "prod").unwrap();
        let actions: Vec<_> = p.steps.iter().map(|s| (s.id.as_str(), s.action)).collect();
        assert_eq!(
            actions,
            vec![
                ("migrate-primary-pre_deploy", StepAction::Migrate),
                ("build-backend", StepAction::Build),
                ("deploy-prod", StepAction::ApplyCompose),
                ("health-check-prod", StepAction::HealthCheck),
            ]
        );

        let deploy = p.step("deploy-prod").unwrap();
        assert_eq!(deploy.dependencies, vec!["build-backend", "migrate-primary-pre_deploy"]);
    }

    #[test]
    fn post_deploy_migration_runs_after_deploy() {
        let mut databases = BTreeMap::new();
        databases.insert("primary".to_string(), db(MigrationStrategy::PostDeploy));
        let manifest = manifest_with(databases, None);

        let p = plan(&manifest, "prod").unwrap();
        let ids: Vec<_> = p.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["build-backend", "deploy-prod", "migrate-primary-post_deploy", "health-check-prod"]);
    }

    #[test]
    fn manual_strategy_database_is_not_planned() {
        let mut databases = BTreeMap::new();
        databases.insert("primary".to_string(), db(MigrationStrategy::Manual));
        let manifest = manifest_with(databases, None);

        let p = plan(&manifest, "prod").unwrap();
        assert!(p.steps.iter().all(|s| s.action != StepAction::Migrate));
    }

    #[test]
    fn infra_provision_emitted_only_when_cloud_configured() {
        let manifest = manifest_with(BTreeMap::new(), None);
        let p = plan(&manifest, "prod").unwrap();
        assert!(!p.steps.iter().any(|s| s.action == StepAction::Create));

        let manifest_with_cloud = manifest_with(
            BTreeMap::new(),
            Some(ProviderSelection { provider: "aws".to_string(), providers: BTreeMap::new() }),
        );
        let p2 = plan(&manifest_with_cloud, "prod").unwrap();
        let infra = p2.steps.iter().find(|s| s.action == StepAction::Create).unwrap();
        assert_eq!(infra.target.kind, "infrastructure");
        let deploy = p2.step("deploy-prod").unwrap();
        assert!(deploy.dependencies.contains(&infra.id));
    }

    #[test]
    fn plan_is_deterministic_across_calls() {
        let manifest = manifest_with(BTreeMap::new(), None);
        let a = plan(&manifest, "prod").unwrap();
        let b = plan(&manifest, "prod").unwrap();
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
        assert_eq!(a.plan_id, b.plan_id);
    }

    #[test]
    fn plan_id_is_24_hex_characters() {
        let manifest = manifest_with(BTreeMap::new(), None);
        let p = plan(&manifest, "prod").unwrap();
        assert_eq!(p.plan_id.len(), 24);
        assert!(p.plan_id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn plan_id_changes_when_environment_changes() {
        let mut environments = BTreeMap::new();
        environments.insert("prod".to_string(), EnvironmentOverlay::default());
        environments.insert("staging".to_string(), EnvironmentOverlay::default());
        let mut manifest = manifest_with(BTreeMap::new(), None);
        manifest.environments = environments;

        let prod = plan(&manifest, "prod").unwrap();
        let staging = plan(&manifest, "staging").unwrap();
        assert_ne!(prod.plan_id, staging.plan_id);
    }

    #[test]
    fn plan_id_changes_when_step_input_changes() {
        let manifest_a = manifest_with(BTreeMap::new(), None);
        let mut manifest_b = manifest_a.clone();
        manifest_b.backend.provider = "kubernetes".to_string();

        let a = plan(&manifest_a, "prod").unwrap();
        let b = plan(&manifest_b, "prod").unwrap();
        assert_ne!(a.plan_id, b.plan_id);
    }

    #[test]
    fn duplicate_step_ids_fail_planning() {
        let mut databases = BTreeMap::new();
        // Two databases with the same name can't exist in a BTreeMap, so
        // simulate the "planner bug" path directly via build_plan.
        databases.insert("primary".to_string(), db(MigrationStrategy::PreDeploy));
        let op = Operation {
            id: "dup".to_string(),
            action: StepAction::Noop,
            target: Target { kind: "x".to_string(), name: "x".to_string(), provider: "x".to_string() },
            host: "local".to_string(),
            inputs: StepInputs::default(),
            dependencies: Vec::new(),
        };
        let op2 = Operation {
            id: "dup".to_string(),
            action: StepAction::Noop,
            target: Target { kind: "x".to_string(), name: "x".to_string(), provider: "x".to_string() },
            host: "local".to_string(),
            inputs: StepInputs::default(),
            dependencies: Vec::new(),
        };
        let err = build_plan("prod", vec![op, op2]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
    }

    #[test]
    fn empty_step_id_fails_planning() {
        let op = Operation {
            id: String::new(),
            action: StepAction::Noop,
            target: Target { kind: "x".to_string(), name: "x".to_string(), provider: "x".to_string() },
            host: "local".to_string(),
            inputs: StepInputs::default(),
            dependencies: Vec::new(),
        };
        let err = build_plan("prod", vec![op]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
    }

    #[test]
    fn dependency_lists_are_lexicographically_sorted() {
        let mut databases = BTreeMap::new();
        databases.insert("zeta".to_string(), db(MigrationStrategy::PreDeploy));
        databases.insert("alpha".to_string(), db(MigrationStrategy::PreDeploy));
        let manifest = manifest_with(databases, None);
        let p = plan(&manifest, "prod").unwrap();
        let deploy = p.step("deploy-prod").unwrap();
        let mut sorted = deploy.dependencies.clone();
        sorted.sort();
        assert_eq!(deploy.dependencies, sorted);
    }
}
