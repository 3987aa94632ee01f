//! stagecraft is a thin command-line surface over `stagecraft-core`: it
//! loads a manifest, wires up the engine's registries, and dispatches to
//! plan/deploy/releases operations. Concrete provider implementations and
//! manifest schema validation are external collaborators (spec §1) — this
//! binary ships with empty registries and lets `ProviderUnavailable`/
//! `unknown provider` errors surface normally when a deploy needs one.

mod cli;
mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands, DeployArgs, PlanArgs, ReleasesCommand};
use config::StagecraftConfig;
use stagecraft_core::executor::default_phase_fns;
use stagecraft_core::lifecycle::{DeployOutcome, DeployRequest};
use stagecraft_core::providers::Registries;
use stagecraft_core::{Manifest, ReleaseStore};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.verbosity).init();

    let config = StagecraftConfig::load(cli.config.as_ref()).context("failed to load stagecraft config")?;
    let manifest = Manifest::load(&cli.manifest)
        .with_context(|| format!("failed to load manifest from {}", cli.manifest.display()))?;

    let store = match &config.state_file {
        Some(path) => ReleaseStore::new(path.clone()),
        None => ReleaseStore::default_store(),
    };

    let token = CancellationToken::new();

    match cli.command {
        Commands::Plan(args) => run_plan(&manifest, args),
        Commands::Deploy(args) => run_deploy(&token, &manifest, &store, args).await,
        Commands::Releases(command) => run_releases(&token, &store, command).await,
    }
}

fn run_plan(manifest: &Manifest, args: PlanArgs) -> Result<()> {
    let plan = stagecraft_core::lifecycle::plan_only(manifest, &args.environment)?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

async fn run_deploy(
    token: &CancellationToken,
    manifest: &Manifest,
    store: &ReleaseStore,
    args: DeployArgs,
) -> Result<()> {
    let request = DeployRequest {
        environment: args.environment,
        version: args.version,
        commit_sha: args.commit_sha,
        dry_run: args.dry_run,
    };

    let phase_fns = default_phase_fns(Arc::new(Registries::default()));
    let outcome = stagecraft_core::run_release(token, manifest, store, phase_fns, request).await?;

    match outcome {
        DeployOutcome::DryRun { plan } => {
            tracing::info!(plan_id = %plan.plan_id, "dry run: no release created");
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        DeployOutcome::Executed { release, .. } => {
            tracing::info!(release_id = %release.id, environment = %release.environment, "release completed");
            println!("{}", serde_json::to_string_pretty(&release)?);
        }
    }
    Ok(())
}

async fn run_releases(token: &CancellationToken, store: &ReleaseStore, command: ReleasesCommand) -> Result<()> {
    match command {
        ReleasesCommand::List { environment } => {
            let releases = store.list_releases(token, &environment).await?;
            println!("{}", serde_json::to_string_pretty(&releases)?);
        }
        ReleasesCommand::Show { id } => {
            let release = store.get_release(token, &id).await?;
            println!("{}", serde_json::to_string_pretty(&release)?);
        }
        ReleasesCommand::RollbackInfo { id } => {
            let target = stagecraft_core::rollback_target(token, store, &id).await?;
            println!("{}", serde_json::to_string_pretty(&target)?);
        }
    }
    Ok(())
}
