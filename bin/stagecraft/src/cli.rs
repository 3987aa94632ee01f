use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "stagecraft")]
#[command(author, version, about = "Plan and execute multi-service deployments from a declarative manifest")]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "STAGECRAFT_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the project manifest.
    #[arg(long, env = "STAGECRAFT_MANIFEST", default_value = "stagecraft.yaml")]
    pub manifest: PathBuf,

    /// Path to a layered config file (TOML) overriding defaults such as the
    /// state-file location.
    #[arg(long, env = "STAGECRAFT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile and print the deployment plan for an environment, without
    /// touching the release store.
    Plan(PlanArgs),
    /// Create a release for an environment and drive it through every
    /// phase, unless `--dry-run` is set.
    Deploy(DeployArgs),
    /// Inspect release history.
    #[command(subcommand)]
    Releases(ReleasesCommand),
}

#[derive(Parser)]
pub struct PlanArgs {
    /// Environment name, as declared under `environments` in the manifest.
    pub environment: String,
}

#[derive(Parser)]
pub struct DeployArgs {
    /// Environment name, as declared under `environments` in the manifest.
    pub environment: String,

    /// Version string recorded on the release. Falls back to an empty
    /// string when not provided.
    #[arg(long, default_value = "")]
    pub version: String,

    /// Commit identifier recorded on the release.
    #[arg(long, default_value = "")]
    pub commit_sha: String,

    /// Compile and print the plan without creating or mutating a release.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum ReleasesCommand {
    /// List releases for an environment, newest first.
    List {
        environment: String,
    },
    /// Show a single release by ID.
    Show {
        id: String,
    },
    /// Show the release a rollback of `id` would restore.
    RollbackInfo {
        id: String,
    },
}
