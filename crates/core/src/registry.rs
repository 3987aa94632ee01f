//! Generic provider registry (spec §4.1).
//!
//! Four parallel registries (backend, cloud, network, migration) are built
//! from this single generic: a string-keyed, append-only map of trait
//! objects. Registration happens at process init and is a programmer error
//! to get wrong (duplicate IDs panic); reads are safe under arbitrary
//! concurrency via an `RwLock`.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, ErrorKind, Result};

pub struct Registry<P: ?Sized> {
    entries: RwLock<BTreeMap<String, Arc<P>>>,
}

impl<P: ?Sized> Default for Registry<P> {
    fn default() -> Self {
        Self { entries: RwLock::new(BTreeMap::new()) }
    }
}

impl<P: ?Sized> Registry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under `id`. Panics if `id` is already
    /// registered: per spec §4.1 this is a programmer error, not a
    /// recoverable one, because it can only happen at init time before any
    /// release work has started.
    pub fn register(&self, id: impl Into<String>, provider: Arc<P>) {
        let id = id.into();
        let mut entries = self.entries.write().expect("registry lock poisoned");
        if entries.contains_key(&id) {
            panic!("duplicate provider registration for id `{id}`");
        }
        entries.insert(id, provider);
    }

    pub fn get(&self, id: &str) -> Result<Arc<P>> {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries.get(id).cloned().ok_or_else(|| {
            Error::new(
                ErrorKind::Validation,
                format!("unknown provider `{id}`; registered providers: [{}]", Self::join(&entries)),
            )
        })
    }

    pub fn has(&self, id: &str) -> bool {
        self.entries.read().expect("registry lock poisoned").contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.read().expect("registry lock poisoned").keys().cloned().collect()
    }

    fn join(entries: &BTreeMap<String, Arc<P>>) -> String {
        entries.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}
