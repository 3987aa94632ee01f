//! Release-history store (spec §4.2): an append-only log of releases keyed
//! by environment, with per-phase status, persisted as a single JSON
//! document via the crash-safe write protocol in [`atomic`].

mod atomic;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::id::{self, Clock, SystemClock};

/// Default relative state-file path (spec §4.2, §6).
pub const DEFAULT_STATE_FILE: &str = ".stagecraft/releases.json";

/// Environment variable overriding the default store path (spec §4.2, §6).
pub const STATE_FILE_ENV_VAR: &str = "STAGECRAFT_STATE_FILE";

/// The six canonical release phases, in their fixed execution order (spec
/// §3, §4.4). Declaration order doubles as `Ord`, so a `BTreeMap<Phase, _>`
/// always iterates/serializes in canonical order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display, strum::EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Build,
    Push,
    MigratePre,
    Rollout,
    MigratePost,
    Finalize,
}

impl Phase {
    pub const ALL: [Phase; 6] =
        [Phase::Build, Phase::Push, Phase::MigratePre, Phase::Rollout, Phase::MigratePost, Phase::Finalize];

    /// The phases strictly after `self` in canonical order.
    pub fn downstream(self) -> &'static [Phase] {
        let idx = Self::ALL.iter().position(|p| *p == self).expect("phase is in ALL");
        &Self::ALL[idx + 1..]
    }

    /// Parse a phase name, rejecting unknown identifiers with a validation
    /// error (spec §4.2: `UpdatePhase` "rejects unknown phase identifiers").
    pub fn parse(name: &str) -> Result<Self> {
        use std::str::FromStr;
        Self::from_str(name).map_err(|_| Error::validation(format!("unknown phase: {name}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

pub type PhaseMap = std::collections::BTreeMap<Phase, PhaseStatus>;

fn pending_phase_map() -> PhaseMap {
    Phase::ALL.into_iter().map(|p| (p, PhaseStatus::Pending)).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: String,
    pub environment: String,
    pub version: String,
    #[serde(default)]
    pub commit_sha: String,
    pub timestamp: DateTime<Utc>,
    /// Missing on a loaded legacy document, silently normalized to an
    /// empty map (spec §6); always fully populated on created releases.
    #[serde(default)]
    pub phases: PhaseMap,
    #[serde(default)]
    pub previous_id: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    releases: Vec<Release>,
}

pub struct ReleaseStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    lock: Mutex<()>,
}

impl ReleaseStore {
    /// Build a store bound to an explicit path. Multiple instances bound to
    /// the same path observe each other's writes (spec §4.2 read-after-write
    /// guarantee) because no instance caches the document in memory.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    pub fn with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self { path: path.into(), clock, lock: Mutex::new(()) }
    }

    /// Build a store at the default path, resolved per spec §4.2/§6
    /// precedence: explicit path (not applicable here) > `STAGECRAFT_STATE_FILE`
    /// (re-read on every call) > `.stagecraft/releases.json`.
    pub fn default_store() -> Self {
        Self::new(Self::default_path())
    }

    pub fn default_path() -> PathBuf {
        match std::env::var(STATE_FILE_ENV_VAR) {
            Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
            _ => PathBuf::from(DEFAULT_STATE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self, token: &CancellationToken) -> Result<Document> {
        check_cancelled(token)?;
        let doc = atomic::read_json::<Document>(&self.path).await?.unwrap_or_default();
        check_cancelled(token)?;
        Ok(doc)
    }

    async fn save(&self, token: &CancellationToken, doc: &Document) -> Result<()> {
        check_cancelled(token)?;
        atomic::write_json_atomic(&self.path, doc).await?;
        check_cancelled(token)?;
        Ok(())
    }

    pub async fn create_release(
        &self,
        token: &CancellationToken,
        environment: &str,
        version: &str,
        commit_sha: &str,
    ) -> Result<Release> {
        let environment = environment.trim();
        let version = version.trim();
        if environment.is_empty() {
            return Err(Error::validation("environment must not be empty"));
        }
        if version.is_empty() {
            return Err(Error::validation("version must not be empty"));
        }

        let _guard = self.lock.lock().await;
        let mut doc = self.load(token).await?;

        let previous_id = most_recent(&doc.releases, environment).map(|r| r.id.clone()).unwrap_or_default();

        let release = Release {
            id: id::release_id(self.clock.now()),
            environment: environment.to_string(),
            version: version.to_string(),
            commit_sha: commit_sha.trim().to_string(),
            timestamp: self.clock.now(),
            phases: pending_phase_map(),
            previous_id,
        };

        doc.releases.push(release.clone());
        self.save(token, &doc).await?;
        Ok(release)
    }

    pub async fn get_release(&self, token: &CancellationToken, id: &str) -> Result<Release> {
        let _guard = self.lock.lock().await;
        let doc = self.load(token).await?;
        doc.releases.into_iter().find(|r| r.id == id).ok_or_else(|| Error::release_not_found(id))
    }

    pub async fn get_current_release(&self, token: &CancellationToken, environment: &str) -> Result<Release> {
        let _guard = self.lock.lock().await;
        let doc = self.load(token).await?;
        most_recent(&doc.releases, environment).cloned().ok_or_else(|| {
            Error::release_not_found(format!("<current release for environment `{environment}`>"))
        })
    }

    pub async fn update_phase(
        &self,
        token: &CancellationToken,
        release_id: &str,
        phase: Phase,
        status: PhaseStatus,
    ) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load(token).await?;
        let release = doc
            .releases
            .iter_mut()
            .find(|r| r.id == release_id)
            .ok_or_else(|| Error::release_not_found(release_id))?;
        release.phases.insert(phase, status);
        self.save(token, &doc).await
    }

    /// Convenience wrapper over [`ReleaseStore::update_phase`] for callers
    /// (e.g. the CLI) holding a phase name rather than a typed [`Phase`].
    pub async fn update_phase_by_name(
        &self,
        token: &CancellationToken,
        release_id: &str,
        phase_name: &str,
        status: PhaseStatus,
    ) -> Result<()> {
        let phase = Phase::parse(phase_name)?;
        self.update_phase(token, release_id, phase, status).await
    }

    pub async fn list_releases(&self, token: &CancellationToken, environment: &str) -> Result<Vec<Release>> {
        let _guard = self.lock.lock().await;
        let doc = self.load(token).await?;
        let mut releases: Vec<Release> =
            doc.releases.into_iter().filter(|r| r.environment == environment).collect();
        releases.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(releases)
    }

    /// Total deterministic order: environment ascending, timestamp
    /// descending, id ascending (spec §4.2, §9).
    pub async fn list_all_releases(&self, token: &CancellationToken) -> Result<Vec<Release>> {
        let _guard = self.lock.lock().await;
        let mut releases = self.load(token).await?.releases;
        releases.sort_by(|a, b| {
            a.environment
                .cmp(&b.environment)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(releases)
    }
}

/// The most-recent release for `environment`, breaking timestamp ties by
/// id ascending (spec §9 open-question decision).
fn most_recent<'a>(releases: &'a [Release], environment: &str) -> Option<&'a Release> {
    releases
        .iter()
        .filter(|r| r.environment == environment)
        .max_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)))
}

fn check_cancelled(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() { Err(Error::cancelled()) } else { Ok(()) }
}

#[cfg(any(test, feature = "test-util"))]
pub mod testing {
    use super::*;

    /// A `ReleaseStore` rooted in a fresh temp directory, with a fixed
    /// clock the caller can advance explicitly (spec §4.4, §8 test-harness
    /// affordances).
    pub struct TestStore {
        pub store: ReleaseStore,
        pub clock: Arc<crate::id::FixedClock>,
        _dir: tempdir::TempDir,
    }

    pub fn isolated_store(start: DateTime<Utc>) -> TestStore {
        let dir = tempdir::TempDir::new("stagecraft-store-test").expect("failed to create temp dir");
        let clock = Arc::new(crate::id::FixedClock::advancing(start, chrono::Duration::milliseconds(1)));
        let path = dir.path().join("releases.json");
        let store = ReleaseStore::with_clock(path, clock.clone());
        TestStore { store, clock, _dir: dir }
    }
}
