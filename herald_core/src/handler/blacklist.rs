/*!
 * The handler blacklist.
 *
 * A set of registration ids excluded from delivery. Insertion is
 * monotone for the lifetime of a bus; `contains` sweeps out ids whose
 * backing registration no longer resolves, so the set stays bounded
 * over long runs with handler churn. Ids are never reused by the
 * registry, so a pruned id can never come back to life.
 */

use std::collections::HashSet;
use std::sync::Mutex;

use crate::handler::registry::{HandlerRegistry, RegistrationId};
use crate::util::lock_unpoisoned;

pub struct Blacklist {
    ids: Mutex<HashSet<RegistrationId>>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self {
            ids: Mutex::new(HashSet::new()),
        }
    }

    /// Adds an id. Returns `true` when it was not blacklisted before.
    pub fn add(&self, id: RegistrationId) -> bool {
        lock_unpoisoned(&self.ids).insert(id)
    }

    /**
     * Whether `id` is blacklisted. As a side effect, drops every
     * entry whose registration has vanished from the registry.
     */
    pub fn contains(&self, id: RegistrationId, registry: &dyn HandlerRegistry) -> bool {
        let mut ids = lock_unpoisoned(&self.ids);
        ids.retain(|&candidate| registry.resolve(candidate).is_some());
        ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.ids).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Blacklist {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::handler::registry::{EventHandler, LocalHandlerRegistry};
    use std::sync::Arc;

    fn noop() -> Arc<dyn EventHandler> {
        Arc::new(|_: &Event| Ok(()))
    }

    #[test]
    fn test_add_and_contains() {
        let registry = LocalHandlerRegistry::new();
        let id = registry
            .register(vec!["a".into()], None, "t", noop())
            .expect("register");
        let blacklist = Blacklist::new();
        assert!(!blacklist.contains(id, &registry));
        assert!(blacklist.add(id));
        assert!(!blacklist.add(id));
        assert!(blacklist.contains(id, &registry));
    }

    /**
     * Entries whose registration is gone are pruned on lookup, keeping
     * the set bounded.
     */
    #[test]
    fn test_stale_entries_are_pruned() {
        let registry = LocalHandlerRegistry::new();
        let stale = registry
            .register(vec!["a".into()], None, "t", noop())
            .expect("register");
        let live = registry
            .register(vec!["a".into()], None, "t", noop())
            .expect("register");

        let blacklist = Blacklist::new();
        blacklist.add(stale);
        blacklist.add(live);
        assert_eq!(blacklist.len(), 2);

        registry.unregister(stale);
        assert!(blacklist.contains(live, &registry));
        assert_eq!(blacklist.len(), 1);
        assert!(!blacklist.contains(stale, &registry));
    }
}
