//! Failure classification from configured error-type names.
//!
//! Configuration carries a list of fully-qualified error-type names whose
//! failures must never be retried. At startup the names are resolved
//! through an explicit registry into [`ErrorKind`] values; the resulting
//! [`NonRetryableSet`] is immutable for the process lifetime and consulted
//! on every processing failure.
//!
//! Resolution is lenient: an unknown name is logged with a warning and
//! skipped, so a configuration written for a different deployment does not
//! abort startup.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::error::ErrorKind;

/// Registry mapping configured error-type names to error kinds.
///
/// Populated at startup. Canonical kind names are always present;
/// deployment-specific aliases (for example legacy fully-qualified class
/// names) are added with [`register`](Self::register).
#[derive(Debug, Clone, Default)]
pub struct ErrorKindRegistry {
    by_name: HashMap<String, ErrorKind>,
}

impl ErrorKindRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every kind registered under its canonical
    /// name.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in ErrorKind::ALL {
            registry.register(kind.name(), kind);
        }
        registry
    }

    /// Registers a name for an error kind.
    ///
    /// Later registrations win, so aliases can shadow defaults.
    pub fn register(&mut self, name: impl Into<String>, kind: ErrorKind) {
        self.by_name.insert(name.into(), kind);
    }

    /// Resolves a configured name to an error kind, if known.
    pub fn resolve(&self, name: &str) -> Option<ErrorKind> {
        self.by_name.get(name).copied()
    }

    /// Number of registered names.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Returns true if no names are registered.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Set of error kinds whose failures route straight to dead-letter.
///
/// Built once at startup and never mutated afterwards; concurrent reads
/// need no synchronization.
#[derive(Debug, Clone, Default)]
pub struct NonRetryableSet {
    kinds: HashSet<ErrorKind>,
}

impl NonRetryableSet {
    /// Creates an empty set: every failure is retryable.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Resolves configured names into a non-retryable set.
    ///
    /// Unresolvable names are logged with a warning and skipped; the set
    /// is built from whatever resolved.
    pub fn from_names<'a, I>(registry: &ErrorKindRegistry, names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut kinds = HashSet::new();

        for name in names {
            match registry.resolve(name) {
                Some(kind) => {
                    debug!(name, kind = %kind, "registered non-retryable error");
                    kinds.insert(kind);
                },
                None => {
                    warn!(name, "could not resolve configured non-retryable error name, skipping");
                },
            }
        }

        Self { kinds }
    }

    /// Returns true if failures of this kind must not be retried.
    pub fn contains(&self, kind: ErrorKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Number of non-retryable kinds.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Returns true if no kinds are classified non-retryable.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_canonical_names() {
        let registry = ErrorKindRegistry::with_defaults();

        assert_eq!(registry.resolve("MalformedPayload"), Some(ErrorKind::MalformedPayload));
        assert_eq!(registry.resolve("Timeout"), Some(ErrorKind::Timeout));
        assert_eq!(registry.resolve("it.unknown.SomeException"), None);
    }

    #[test]
    fn aliases_resolve_to_registered_kind() {
        let mut registry = ErrorKindRegistry::with_defaults();
        registry.register("com.x.TimeoutError", ErrorKind::Timeout);

        assert_eq!(registry.resolve("com.x.TimeoutError"), Some(ErrorKind::Timeout));
    }

    #[test]
    fn unknown_names_are_skipped_not_fatal() {
        let registry = ErrorKindRegistry::with_defaults();
        let set = NonRetryableSet::from_names(
            &registry,
            ["MalformedPayload", "it.unknown.SomeException", "Validation"],
        );

        assert_eq!(set.len(), 2);
        assert!(set.contains(ErrorKind::MalformedPayload));
        assert!(set.contains(ErrorKind::Validation));
        assert!(!set.contains(ErrorKind::Timeout));
    }

    #[test]
    fn empty_config_yields_empty_set() {
        let registry = ErrorKindRegistry::with_defaults();
        let set = NonRetryableSet::from_names(&registry, []);

        assert!(set.is_empty());
        assert!(!set.contains(ErrorKind::Storage));
    }

    #[test]
    fn duplicate_names_collapse() {
        let registry = ErrorKindRegistry::with_defaults();
        let set = NonRetryableSet::from_names(&registry, ["Timeout", "Timeout"]);

        assert_eq!(set.len(), 1);
    }
}
