/*!
 * From an event to its handler tasks.
 *
 * `HandlerTaskFactory` is the matching front of the bus: it asks the
 * registry for candidate registrations per event (no handler
 * book-keeping between events), applies the blacklist and the
 * per-registration predicate, and produces one single-use
 * `HandlerTask` per surviving handler, in registry order.
 *
 * Two LRU caches absorb the per-event cost:
 * - the *topic* cache maps a full event topic to its expanded mask
 *   disjunction;
 * - the *filter* cache maps predicate source text to the compiled
 *   `Filter`.
 *
 * Evicting either cache entry only costs latency, never correctness,
 * and resizing applies from the next insertion.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::CacheMap;
use crate::config::BusConfig;
use crate::error::BusResult;
use crate::event::{topic, Event};
use crate::filter::{self, Filter};
use crate::handler::blacklist::Blacklist;
use crate::handler::registry::{EventHandler, HandlerRegistry, RegistrationId};
use crate::tasks::HandlerTask;

pub struct HandlerTaskFactory {
    registry: Arc<dyn HandlerRegistry>,
    blacklist: Blacklist,
    topic_cache: CacheMap<String, Arc<Vec<String>>>,
    filter_cache: CacheMap<String, Arc<Filter>>,
    require_topic: AtomicBool,
}

impl HandlerTaskFactory {
    pub fn new(registry: Arc<dyn HandlerRegistry>, config: &BusConfig) -> Self {
        Self {
            registry,
            blacklist: Blacklist::new(),
            topic_cache: CacheMap::new(config.cache_size),
            filter_cache: CacheMap::new(config.cache_size),
            require_topic: AtomicBool::new(config.require_topic),
        }
    }

    /**
     * Builds the delivery tasks for `event`: every non-blacklisted
     * registration whose mask set covers the topic and whose predicate
     * accepts the property map, in registry order.
     */
    pub fn create_handler_tasks(self: &Arc<Self>, event: Event) -> Vec<Arc<HandlerTask>> {
        let event = Arc::new(event);
        let masks = self.masks_for(event.topic());
        let require_topic = self.require_topic.load(Ordering::SeqCst);

        let mut tasks = Vec::new();
        for registration in self.registry.select(&masks, require_topic) {
            if self
                .blacklist
                .contains(registration.id, self.registry.as_ref())
            {
                continue;
            }

            let predicate = match &registration.filter {
                None => Arc::new(Filter::True),
                Some(source) => match self.compiled(source) {
                    Ok(compiled) => compiled,
                    Err(err) => {
                        log::warn!(
                            "skipping handler {} ({}): {err}",
                            registration.id,
                            registration.kind
                        );
                        continue;
                    }
                },
            };

            if predicate.matches(event.properties()) {
                tasks.push(Arc::new(HandlerTask::new(
                    registration,
                    Arc::clone(&event),
                    Arc::clone(self),
                )));
            }
        }
        tasks
    }

    /// Cached topic expansion.
    fn masks_for(&self, event_topic: &str) -> Arc<Vec<String>> {
        if let Some(cached) = self.topic_cache.get(&event_topic.to_string()) {
            return cached;
        }
        let expanded = Arc::new(topic::expand(event_topic));
        self.topic_cache
            .insert(event_topic.to_string(), Arc::clone(&expanded));
        expanded
    }

    /// Cached predicate compilation.
    fn compiled(&self, source: &str) -> BusResult<Arc<Filter>> {
        if let Some(cached) = self.filter_cache.get(&source.to_string()) {
            return Ok(cached);
        }
        let compiled = Arc::new(filter::parse(source)?);
        self.filter_cache
            .insert(source.to_string(), Arc::clone(&compiled));
        Ok(compiled)
    }

    /**
     * Resolves the live callback for a task, or `None` when the
     * registration is stale or has been blacklisted since the task
     * was created.
     */
    pub(crate) fn live_handler(&self, id: RegistrationId) -> Option<Arc<dyn EventHandler>> {
        if self.blacklist.contains(id, self.registry.as_ref()) {
            return None;
        }
        self.registry.resolve(id)
    }

    /// Excludes a handler from all further deliveries.
    pub(crate) fn blacklist(&self, id: RegistrationId, kind: &str, reason: &str) {
        if self.blacklist.add(id) {
            log::warn!("blacklisting handler {id} ({kind}): {reason}");
        }
    }

    pub fn is_blacklisted(&self, id: RegistrationId) -> bool {
        self.blacklist.contains(id, self.registry.as_ref())
    }

    /// Applies a new configuration snapshot.
    pub fn update(&self, config: &BusConfig) {
        self.topic_cache.resize(config.cache_size);
        self.filter_cache.resize(config.cache_size);
        self.require_topic
            .store(config.require_topic, Ordering::SeqCst);
    }
}
