/*!
 * Handler registrations and the registry contract.
 *
 * The bus never owns handlers. It consumes a `HandlerRegistry`: an
 * external directory that resolves a registration id to a live
 * callback and answers "which registrations could match this topic".
 * `LocalHandlerRegistry` is the in-process reference implementation
 * used by embedders, the demo, and the test suite.
 */

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{BusResult, HandlerError};
use crate::event::{topic, Event};
use crate::filter;
use crate::util::lock_unpoisoned;

/// Stable handle of one handler registration. Monotone; never reused
/// within a registry's lifetime.
pub type RegistrationId = u64;

// ---------------------------------------------------------------------------
// The callback capability
// ---------------------------------------------------------------------------

/**
 * A subscriber callback: one function accepting an event.
 *
 * Returning an error (or panicking) gets the handler blacklisted; the
 * bus logs the failure and keeps running.
 */
pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event) -> Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
    F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle_event(&self, event: &Event) -> Result<(), HandlerError> {
        self(event)
    }
}

// ---------------------------------------------------------------------------
// Registration record
// ---------------------------------------------------------------------------

/**
 * The externally visible description of one registration.
 *
 * `kind` is an opaque tag chosen by the registrant; the
 * `ignore_timeout_handler_names` configuration matches against it.
 */
#[derive(Clone, Debug)]
pub struct Registration {
    pub id: RegistrationId,
    pub masks: Vec<String>,
    pub filter: Option<String>,
    pub kind: String,
}

// ---------------------------------------------------------------------------
// Registry contract
// ---------------------------------------------------------------------------

/**
 * What the bus needs from the outside world.
 */
pub trait HandlerRegistry: Send + Sync {
    /**
     * Resolves a registration id to its live callback, or `None` when
     * the registration has been removed. A task holding a stale id
     * simply delivers to no one.
     */
    fn resolve(&self, id: RegistrationId) -> Option<Arc<dyn EventHandler>>;

    /**
     * Returns the registrations whose mask list intersects `masks`,
     * in registration order (ties by id ascending). When
     * `require_topic` is false, registrations without any mask are
     * included as well.
     */
    fn select(&self, masks: &[String], require_topic: bool) -> Vec<Registration>;
}

// ---------------------------------------------------------------------------
// LocalHandlerRegistry
// ---------------------------------------------------------------------------

struct RegistryEntry {
    registration: Registration,
    handler: Arc<dyn EventHandler>,
}

/**
 * In-process registry keyed by monotone ids. A `BTreeMap` keeps the
 * iteration in id order, which doubles as registration order.
 */
pub struct LocalHandlerRegistry {
    next_id: AtomicU64,
    entries: Mutex<BTreeMap<RegistrationId, RegistryEntry>>,
}

impl LocalHandlerRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /**
     * Adds a handler subscribed to `masks`, optionally constrained by
     * an LDAP predicate. Masks and predicate are validated up front;
     * a malformed one is an invalid-argument error and nothing is
     * registered.
     *
     * # Returns
     * The registration id to use for `unregister`.
     */
    pub fn register(
        &self,
        masks: Vec<String>,
        predicate: Option<String>,
        kind: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> BusResult<RegistrationId> {
        for mask in &masks {
            topic::validate_mask(mask)?;
        }
        if let Some(source) = &predicate {
            filter::parse(source)?;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let registration = Registration {
            id,
            masks,
            filter: predicate,
            kind: kind.into(),
        };
        lock_unpoisoned(&self.entries).insert(
            id,
            RegistryEntry {
                registration,
                handler,
            },
        );
        Ok(id)
    }

    /// Removes a registration. Returns whether it existed. A task
    /// already created for it will find no callback and deliver to no
    /// one.
    pub fn unregister(&self, id: RegistrationId) -> bool {
        lock_unpoisoned(&self.entries).remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LocalHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry for LocalHandlerRegistry {
    fn resolve(&self, id: RegistrationId) -> Option<Arc<dyn EventHandler>> {
        lock_unpoisoned(&self.entries)
            .get(&id)
            .map(|entry| Arc::clone(&entry.handler))
    }

    fn select(&self, masks: &[String], require_topic: bool) -> Vec<Registration> {
        lock_unpoisoned(&self.entries)
            .values()
            .filter(|entry| {
                let registered = &entry.registration.masks;
                if registered.is_empty() {
                    !require_topic
                } else {
                    registered.iter().any(|m| masks.iter().any(|q| q == m))
                }
            })
            .map(|entry| entry.registration.clone())
            .collect()
    }
}
