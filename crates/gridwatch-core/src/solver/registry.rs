//! Data-driven registry of [`PowerFlowBackend`] constructors, so the
//! orchestrator can select a backend by name (e.g. from a CLI flag)
//! without the crate graph knowing about every backend implementation.

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::RwLock,
};

use super::backend::PowerFlowBackend;
use super::newton::NewtonRaphsonBackend;

type BackendConstructor = fn() -> Box<dyn PowerFlowBackend>;

struct BackendEntry {
    canonical: &'static str,
    constructor: BackendConstructor,
}

struct BackendRegistry {
    entries: HashMap<String, BackendEntry>,
}

impl BackendRegistry {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn register(&mut self, name: &'static str, constructor: BackendConstructor) -> bool {
        let key = normalize(name);
        let entry = BackendEntry {
            canonical: name,
            constructor,
        };
        self.entries.insert(key, entry).is_none()
    }

    fn entry_for(&self, name: &str) -> Option<&BackendEntry> {
        self.entries.get(&normalize(name))
    }

    fn constructor_for(&self, canonical: &'static str) -> Option<BackendConstructor> {
        self.entries
            .values()
            .find(|entry| entry.canonical == canonical)
            .map(|entry| entry.constructor)
    }

    fn available(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> =
            self.entries.values().map(|entry| entry.canonical).collect();
        names.sort_unstable();
        names
    }
}

static GLOBAL_BACKEND_REGISTRY: Lazy<RwLock<BackendRegistry>> = Lazy::new(|| {
    let mut registry = BackendRegistry::new();
    registry.register("newton", || Box::new(NewtonRaphsonBackend::new()));
    RwLock::new(registry)
});

fn normalize(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
        "default" => "newton".to_string(),
        other => other.to_string(),
    }
}

/// Register an additional backend constructor (e.g. from an external crate).
pub fn register_backend(name: &'static str, constructor: BackendConstructor) -> bool {
    let mut registry = GLOBAL_BACKEND_REGISTRY
        .write()
        .expect("power-flow backend registry lock poisoned");
    registry.register(name, constructor)
}

/// A validated, registered backend name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SolverKind(&'static str);

impl SolverKind {
    pub fn as_str(&self) -> &'static str {
        self.0
    }

    pub fn available() -> Vec<&'static str> {
        GLOBAL_BACKEND_REGISTRY
            .read()
            .expect("power-flow backend registry lock poisoned")
            .available()
    }

    pub fn build(&self) -> Box<dyn PowerFlowBackend> {
        let registry = GLOBAL_BACKEND_REGISTRY
            .read()
            .expect("power-flow backend registry lock poisoned");
        registry
            .constructor_for(self.0)
            .map(|constructor| constructor())
            .expect("backend constructor missing for registered kind")
    }
}

impl Default for SolverKind {
    fn default() -> Self {
        SolverKind("newton")
    }
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl FromStr for SolverKind {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> Result<Self> {
        let registry = GLOBAL_BACKEND_REGISTRY
            .read()
            .expect("power-flow backend registry lock poisoned");
        if let Some(entry) = registry.entry_for(input) {
            Ok(SolverKind(entry.canonical))
        } else {
            Err(anyhow!(
                "unknown power-flow backend '{}'; supported values: {}",
                input,
                registry.available().join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_backend() {
        let kind: SolverKind = "newton".parse().unwrap();
        assert_eq!(kind.as_str(), "newton");
    }

    #[test]
    fn default_alias_resolves_to_newton() {
        let kind: SolverKind = "default".parse().unwrap();
        assert_eq!(kind.as_str(), "newton");
    }

    #[test]
    fn unknown_backend_lists_available() {
        let err = "bogus".parse::<SolverKind>().unwrap_err();
        assert!(err.to_string().contains("newton"));
    }
}
