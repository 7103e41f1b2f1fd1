//! Resource kind registry
//!
//! Process-wide map from kind tag to the functions that bind a parsed node
//! into a preparer record and expose the kind's field schema. Registration
//! is append-only: resource plugins register at program initialization and
//! duplicates are rejected.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::fields::FieldDef;
use crate::resource::Preparer;

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("resource kind \"{0}\" is already registered")]
    AlreadyRegistered(String),

    #[error("unknown resource kind \"{0}\"")]
    UnknownKind(String),

    #[error("cannot bind node of kind \"{kind}\": {detail}")]
    Bind { kind: String, detail: String },
}

/// Constructor turning a parsed node body into a preparer record.
pub type BindFn = fn(&serde_json::Value) -> Result<Arc<dyn Preparer>, RegistryError>;

/// One registered resource kind.
#[derive(Clone, Copy, Debug)]
pub struct RegistryEntry {
    pub kind: &'static str,
    pub bind: BindFn,
    /// Field schema, used for parse-time binding and introspection.
    pub schema: fn() -> &'static [FieldDef],
}

#[derive(Default)]
pub struct Registry {
    entries: RwLock<FxHashMap<&'static str, RegistryEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind. Fails if the tag is taken.
    pub fn register(&self, entry: RegistryEntry) -> Result<(), RegistryError> {
        let mut entries = self.entries.write();
        if entries.contains_key(entry.kind) {
            return Err(RegistryError::AlreadyRegistered(entry.kind.to_string()));
        }
        entries.insert(entry.kind, entry);
        Ok(())
    }

    pub fn lookup(&self, kind: &str) -> Result<RegistryEntry, RegistryError> {
        self.entries
            .read()
            .get(kind)
            .copied()
            .ok_or_else(|| RegistryError::UnknownKind(kind.to_string()))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.entries.read().contains_key(kind)
    }

    /// Registered kind tags, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = self.entries.read().keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}

/// The process-wide registry.
static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub fn global() -> &'static Registry {
    &REGISTRY
}

/// Register a kind in the process-wide registry.
pub fn register(entry: RegistryEntry) -> Result<(), RegistryError> {
    REGISTRY.register(entry)
}

/// Look up a kind in the process-wide registry.
pub fn lookup(kind: &str) -> Result<RegistryEntry, RegistryError> {
    REGISTRY.lookup(kind)
}

/// Bind a parsed node body into a preparer of the given kind.
pub fn bind(kind: &str, body: &serde_json::Value) -> Result<Arc<dyn Preparer>, RegistryError> {
    let entry = lookup(kind)?;
    (entry.bind)(body)
}

/// Register the builtin resource kinds. Safe to call more than once.
pub fn register_builtins() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        for entry in [
            crate::resource::module::registry_entry(),
            crate::resource::shell::registry_entry(),
            crate::resource::file::registry_entry(),
            crate::resource::user::registry_entry(),
            crate::resource::wait::registry_entry(),
        ] {
            REGISTRY
                .register(entry)
                .expect("builtin kinds register once");
        }
    });
}
