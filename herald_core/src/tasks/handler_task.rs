/*!
 * One delivery to one handler.
 *
 * A `HandlerTask` binds a registration id to an event and is consumed
 * exactly once. It resolves the callback at execution time: a
 * registration removed after matching simply delivers to no one,
 * which is not an error.
 *
 * While the callback runs, the executing thread's interrupt handle is
 * published on the task, so a caller that gives up on the handler can
 * blacklist it *and* unwedge the pool thread running it.
 */

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::dispatch::interrupt::{self, InterruptHandle};
use crate::event::Event;
use crate::handler::matcher::HandlerTaskFactory;
use crate::handler::registry::{Registration, RegistrationId};
use crate::util::lock_unpoisoned;

pub struct HandlerTask {
    registration: Registration,
    event: Arc<Event>,
    factory: Arc<HandlerTaskFactory>,
    /// Interrupt handle of the thread currently inside the callback.
    running_on: Mutex<Option<InterruptHandle>>,
}

impl HandlerTask {
    pub(crate) fn new(
        registration: Registration,
        event: Arc<Event>,
        factory: Arc<HandlerTaskFactory>,
    ) -> Self {
        Self {
            registration,
            event,
            factory,
            running_on: Mutex::new(None),
        }
    }

    pub fn id(&self) -> RegistrationId {
        self.registration.id
    }

    /// The registration's handler-kind tag (what the ignore-timeout
    /// list matches on).
    pub fn kind(&self) -> &str {
        &self.registration.kind
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    /**
     * Delivers the event.
     *
     * A failing or panicking callback is logged at warn level and gets
     * the handler blacklisted; the failure never propagates to the
     * dispatch machinery.
     */
    pub fn execute(&self) {
        let Some(handler) = self.factory.live_handler(self.registration.id) else {
            // stale or blacklisted since matching: nothing to do
            return;
        };

        *lock_unpoisoned(&self.running_on) = Some(interrupt::current());
        let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle_event(&self.event)));
        *lock_unpoisoned(&self.running_on) = None;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log::warn!(
                    "handler {} ({}) failed on topic '{}': {err}",
                    self.registration.id,
                    self.registration.kind,
                    self.event.topic()
                );
                self.factory
                    .blacklist(self.registration.id, &self.registration.kind, "callback failed");
            }
            Err(_) => {
                log::warn!(
                    "handler {} ({}) panicked on topic '{}'",
                    self.registration.id,
                    self.registration.kind,
                    self.event.topic()
                );
                self.factory.blacklist(
                    self.registration.id,
                    &self.registration.kind,
                    "callback panicked",
                );
            }
        }
    }

    /**
     * Blacklists the handler and interrupts the worker currently
     * stuck in its callback, if any, so the pool thread is released
     * at its next interruption point.
     */
    pub fn blacklist_handler(&self, reason: &str) {
        self.factory
            .blacklist(self.registration.id, &self.registration.kind, reason);
        if let Some(worker) = lock_unpoisoned(&self.running_on).take() {
            worker.interrupt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use crate::error::HandlerError;
    use crate::event::Properties;
    use crate::handler::registry::{EventHandler, HandlerRegistry, LocalHandlerRegistry};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup(
        handler: Arc<dyn EventHandler>,
    ) -> (Arc<LocalHandlerRegistry>, Arc<HandlerTaskFactory>, Arc<HandlerTask>) {
        let registry = Arc::new(LocalHandlerRegistry::new());
        let id = registry
            .register(vec!["t/*".into()], None, "test-kind", handler)
            .expect("register");
        let as_registry: Arc<dyn HandlerRegistry> = Arc::clone(&registry) as Arc<dyn HandlerRegistry>;
        let factory = Arc::new(HandlerTaskFactory::new(as_registry, &BusConfig::default()));
        let event = Event::new("t/x", Properties::new()).expect("event");
        let mut tasks = factory.create_handler_tasks(event);
        assert_eq!(tasks.len(), 1);
        let task = tasks.remove(0);
        assert_eq!(task.id(), id);
        (registry, factory, task)
    }

    #[test]
    fn test_execute_delivers() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        let (_registry, factory, task) = setup(Arc::new(move |_: &Event| {
            hits2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        task.execute();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!factory.is_blacklisted(task.id()));
    }

    /**
     * A stale registration is a silent no-op, per the contract for
     * handlers unregistered while their task is queued.
     */
    #[test]
    fn test_stale_registration_is_noop() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        let (registry, _factory, task) = setup(Arc::new(move |_: &Event| {
            hits2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        registry.unregister(task.id());
        task.execute();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failing_handler_is_blacklisted() {
        let (_registry, factory, task) = setup(Arc::new(
            |_: &Event| -> Result<(), HandlerError> { Err("deliberate failure".into()) },
        ));
        task.execute();
        assert!(factory.is_blacklisted(task.id()));
    }

    #[test]
    fn test_panicking_handler_is_blacklisted() {
        let (_registry, factory, task) = setup(Arc::new(
            |_: &Event| -> Result<(), HandlerError> { panic!("deliberate panic") },
        ));
        task.execute();
        assert!(factory.is_blacklisted(task.id()));
    }
}
