//! Single-run discipline per simulation identity
//!
//! Hosts share one [`RunRegistry`] between all controllers that may run the
//! same simulation. A controller holds a [`RunGuard`] for the lifetime of its
//! background run; a second controller with the same identity cannot start
//! until the guard is dropped.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Identity of a simulation instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimulationId(String);

impl SimulationId {
    /// Create an identity from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SimulationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SimulationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SimulationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Shared set of simulation identities with an active run
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    active: Arc<Mutex<FxHashSet<SimulationId>>>,
}

impl RunRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FxHashSet<SimulationId>> {
        // The set stays consistent even if a holder panicked
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the run slot for `id`
    ///
    /// # Returns
    ///
    /// A guard releasing the slot on drop, or `None` if `id` is already active
    #[must_use]
    pub fn try_acquire(&self, id: &SimulationId) -> Option<RunGuard> {
        if !self.lock().insert(id.clone()) {
            debug!("Run slot for '{}' is taken", id);
            return None;
        }
        debug!("Acquired run slot for '{}'", id);
        Some(RunGuard {
            registry: self.clone(),
            id: id.clone(),
        })
    }

    /// Whether `id` currently has an active run
    #[must_use]
    pub fn is_active(&self, id: &SimulationId) -> bool {
        self.lock().contains(id)
    }

    /// Number of active runs
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }
}

/// Run slot held for the duration of one run
#[derive(Debug)]
pub struct RunGuard {
    registry: RunRegistry,
    id: SimulationId,
}

impl RunGuard {
    /// Identity this guard holds
    #[must_use]
    pub fn id(&self) -> &SimulationId {
        &self.id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
        debug!("Released run slot for '{}'", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_run_per_identity() {
        let registry = RunRegistry::new();
        let id = SimulationId::new("hull-a");

        let guard = registry.try_acquire(&id).unwrap();
        assert!(registry.is_active(&id));
        assert!(registry.try_acquire(&id).is_none());

        // Other identities are independent
        let other = registry.try_acquire(&"hull-b".into()).unwrap();
        assert_eq!(registry.active_count(), 2);

        drop(guard);
        assert!(!registry.is_active(&id));
        assert!(registry.try_acquire(&id).is_some());
        drop(other);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_clones_share_state() {
        let registry = RunRegistry::new();
        let clone = registry.clone();
        let _guard = registry.try_acquire(&"x".into()).unwrap();
        assert!(clone.try_acquire(&"x".into()).is_none());
    }
}
