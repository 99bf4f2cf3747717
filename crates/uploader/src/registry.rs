//! In-flight request registry.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use upqueue_core::JobId;

use crate::lock;

#[derive(Debug)]
struct InFlight {
    generation: u64,
    token: CancellationToken,
}

/// Ticket for one registered transport call.
#[derive(Debug, Clone)]
pub struct Registration {
    pub generation: u64,
    pub token: CancellationToken,
}

/// What `release` found for a finished call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The call was still the registered one; its entry is gone now.
    Current,
    /// A newer call for the same job replaced it.
    Superseded,
    /// No entry: the call was cancelled through `cancel` or `cancel_all`.
    Missing,
}

#[derive(Debug, Default)]
struct Entries {
    live: HashMap<JobId, InFlight>,
    /// Replaced calls that have not settled yet.
    superseded: HashSet<u64>,
}

/// Cancelable handles for outstanding transport calls, keyed by job id.
///
/// Holds at most one entry per id. An id without an entry is simply not
/// uploading.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    entries: Mutex<Entries>,
    next_generation: AtomicU64,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new call for `id`, cancelling any call it replaces.
    pub fn register(&self, id: &JobId) -> Registration {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();

        let mut entries = lock(&self.entries);
        let previous = entries.live.insert(
            id.clone(),
            InFlight {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!(job_id = %id, superseded = previous.generation, "replacing in-flight call");
            entries.superseded.insert(previous.generation);
            previous.token.cancel();
        }

        Registration { generation, token }
    }

    /// Cancel and forget the call for `id`. Returns whether one existed.
    ///
    /// Only signals the token; never waits for the transport.
    pub fn cancel(&self, id: &JobId) -> bool {
        match lock(&self.entries).live.remove(id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every outstanding call. Returns how many there were.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = lock(&self.entries).live.drain().collect();
        for (_, entry) in &drained {
            entry.token.cancel();
        }
        drained.len()
    }

    /// Clear the entry for a finished call, if it is still the current one.
    ///
    /// Call once per registration. A replaced call reports `Superseded` even
    /// when its replacement has already been released.
    pub fn release(&self, id: &JobId, generation: u64) -> Release {
        let mut entries = lock(&self.entries);
        if entries.superseded.remove(&generation) {
            return Release::Superseded;
        }
        match entries.live.get(id) {
            Some(entry) if entry.generation == generation => {
                entries.live.remove(id);
                Release::Current
            }
            Some(_) => Release::Superseded,
            None => Release::Missing,
        }
    }

    /// Whether `generation` is the registered call for `id`.
    pub fn is_current(&self, id: &JobId, generation: u64) -> bool {
        lock(&self.entries)
            .live
            .get(id)
            .is_some_and(|entry| entry.generation == generation)
    }

    pub fn contains(&self, id: &JobId) -> bool {
        lock(&self.entries).live.contains_key(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids with an outstanding call, sorted.
    pub fn ids(&self) -> Vec<JobId> {
        let mut ids: Vec<_> = lock(&self.entries).live.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> JobId {
        JobId::new(s).unwrap()
    }

    #[test]
    fn register_and_release() {
        let registry = RequestRegistry::new();
        let reg = registry.register(&id("a"));

        assert!(registry.contains(&id("a")));
        assert!(registry.is_current(&id("a"), reg.generation));
        assert_eq!(registry.release(&id("a"), reg.generation), Release::Current);
        assert!(registry.is_empty());
        assert_eq!(registry.release(&id("a"), reg.generation), Release::Missing);
    }

    #[test]
    fn entries_are_keyed_by_job_id() {
        let registry = RequestRegistry::new();
        let a = registry.register(&id("a"));
        let b = registry.register(&id("b"));

        assert_eq!(registry.ids(), vec![id("a"), id("b")]);
        assert!(registry.cancel(&id("a")));
        assert!(a.token.is_cancelled());
        assert!(!b.token.is_cancelled());
        assert_eq!(registry.ids(), vec![id("b")]);
    }

    #[test]
    fn re_registering_cancels_the_previous_call() {
        let registry = RequestRegistry::new();
        let first = registry.register(&id("a"));
        let second = registry.register(&id("a"));

        assert!(first.token.is_cancelled());
        assert!(!second.token.is_cancelled());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.release(&id("a"), first.generation), Release::Superseded);
        assert!(registry.is_current(&id("a"), second.generation));
    }

    #[test]
    fn replaced_call_stays_superseded_after_replacement_settles() {
        let registry = RequestRegistry::new();
        let first = registry.register(&id("a"));
        let second = registry.register(&id("a"));

        assert_eq!(registry.release(&id("a"), second.generation), Release::Current);
        assert_eq!(registry.release(&id("a"), first.generation), Release::Superseded);
        assert_eq!(registry.release(&id("a"), first.generation), Release::Missing);
    }

    #[test]
    fn cancel_unknown_id_is_not_an_error() {
        let registry = RequestRegistry::new();
        assert!(!registry.cancel(&id("nobody")));
    }

    #[test]
    fn cancel_all_drains() {
        let registry = RequestRegistry::new();
        let a = registry.register(&id("a"));
        let b = registry.register(&id("b"));

        assert_eq!(registry.cancel_all(), 2);
        assert!(a.token.is_cancelled() && b.token.is_cancelled());
        assert!(registry.is_empty());
    }
}
