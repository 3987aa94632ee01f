//! Error taxonomy shared across the engine.
//!
//! Every fallible engine operation returns [`Error`], which carries a
//! classifiable [`ErrorKind`] in addition to a human-readable message and an
//! optional source. Callers that need to branch on failure category (the
//! store's `ReleaseNotFound` sentinel, the executor's `Cancelled` path, ...)
//! match on `.kind()` rather than parsing the `Display` output.

use std::fmt;

/// Coarse classification of an engine failure, independent of which
/// component raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input: empty env/version, unknown phase, unknown environment,
    /// unregistered provider, missing per-provider config block.
    Validation,
    /// A lookup (release, current release) found nothing.
    NotFound,
    /// Filesystem I/O during a store read/write. `atomic` is `true` when the
    /// failure happened after the rename committed (so the document on disk
    /// is known-good) and `false` when it happened before.
    Persistence { atomic: bool },
    /// A required external dependency is missing or incompatible.
    ProviderUnavailable,
    /// A provider operation ran but failed.
    ProviderFailure,
    /// Missing or invalid credentials/configuration.
    AuthOrConfig,
    /// The operation observed context cancellation or a deadline.
    Cancelled,
    /// A programmer error: duplicate/empty step IDs, duplicate provider
    /// registration. Always fatal.
    Internal,
}

/// An engine error: a [`ErrorKind`], a message, and an optional source.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), source: None }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self { kind, message: message.into(), source: Some(Box::new(source)) }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn release_not_found(release_id: impl fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, format!("release not found: {release_id}"))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    pub fn persistence(atomic: bool, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Persistence { atomic }, message)
    }

    /// Wrap a provider-raised cause as `<provider-id>: <operation>: <cause>`
    /// (spec §4.1, §7).
    pub fn provider(
        kind: ErrorKind,
        provider_id: &str,
        operation: &str,
        cause: impl fmt::Display,
    ) -> Self {
        Self::new(kind, format!("{provider_id}: {operation}: {cause}"))
    }

    /// Wrap a per-phase failure as `phase {name} failed: {cause}` (spec §7).
    pub fn phase_failed(phase: impl fmt::Display, cause: Self) -> Self {
        let kind = cause.kind();
        Self::new(kind, format!("phase {phase} failed: {cause}"))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::with_source(ErrorKind::Persistence { atomic: false }, value.to_string(), value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Validation, value.to_string(), value)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(value: serde_yaml::Error) -> Self {
        Error::with_source(ErrorKind::Validation, value.to_string(), value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
