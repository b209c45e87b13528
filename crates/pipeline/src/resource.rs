//! Exclusive resource arbitration (spec §4.1).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use uuid::Uuid;

/// A named exclusive capability a stage may require.
///
/// Closed set, by design: adding a new variant is a workspace-wide,
/// explicit decision, never a string the caller makes up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    AudioInput,
    Keyboard,
    Network,
    Filesystem,
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Resource::AudioInput => "AUDIO_INPUT",
            Resource::Keyboard => "KEYBOARD",
            Resource::Network => "NETWORK",
            Resource::Filesystem => "FILESYSTEM",
        };
        f.write_str(s)
    }
}

pub type RunId = Uuid;

#[derive(Default)]
struct ArbiterState {
    holder_of: HashMap<Resource, RunId>,
    resources_of: HashMap<RunId, HashSet<Resource>>,
}

/// Grants exclusive, multi-resource locks to pipeline runs without deadlock.
///
/// All operations run inside a single critical section guarding two maps,
/// per spec §5 "Shared-resource policy".
pub struct ResourceArbiter {
    state: Mutex<ArbiterState>,
}

impl Default for ResourceArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceArbiter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ArbiterState::default()),
        }
    }

    /// Atomically grants the whole resource set or none. Never blocks;
    /// there is no partial acquisition.
    pub fn acquire(&self, run_id: RunId, resources: &HashSet<Resource>) -> bool {
        if resources.is_empty() {
            let mut state = self.state.lock().unwrap();
            state.resources_of.entry(run_id).or_default();
            return true;
        }
        let mut state = self.state.lock().unwrap();
        if resources
            .iter()
            .any(|r| state.holder_of.get(r).is_some_and(|h| *h != run_id))
        {
            return false;
        }
        for r in resources {
            state.holder_of.insert(*r, run_id);
        }
        state
            .resources_of
            .entry(run_id)
            .or_default()
            .extend(resources.iter().copied());
        true
    }

    /// Releases every resource currently attributed to `run_id`. Idempotent.
    pub fn release(&self, run_id: RunId) {
        let mut state = self.state.lock().unwrap();
        if let Some(resources) = state.resources_of.remove(&run_id) {
            for r in resources {
                state.holder_of.remove(&r);
            }
        }
    }

    /// Diagnostic: which of `resources` are currently held by someone else.
    pub fn blocked_by(&self, resources: &HashSet<Resource>) -> HashSet<Resource> {
        let state = self.state.lock().unwrap();
        resources
            .iter()
            .filter(|r| state.holder_of.contains_key(r))
            .copied()
            .collect()
    }

    /// True iff `run_id` currently holds no resources (used by tests to
    /// check the finalizer's cleanup invariant, spec §8).
    pub fn holds_nothing(&self, run_id: RunId) -> bool {
        let state = self.state.lock().unwrap();
        state
            .resources_of
            .get(&run_id)
            .is_none_or(|s| s.is_empty())
    }
}
