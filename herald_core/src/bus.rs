/*!
 * Bus assembly.
 *
 * `EventBus` wires a registry and a configuration snapshot into a
 * running bus: the two pools, the matcher with its caches, the
 * deliverers, and the admin façade. It also owns the lifecycle: config
 * updates are fanned out to every component, and dropping the bus
 * stops it (handlers finish, pools terminate).
 */

use std::sync::{Arc, Mutex};

use crate::admin::EventAdmin;
use crate::config::BusConfig;
use crate::dispatch::pool::PooledExecutor;
use crate::error::BusResult;
use crate::event::Event;
use crate::handler::matcher::HandlerTaskFactory;
use crate::handler::registry::HandlerRegistry;
use crate::tasks::{AsyncDeliverer, SyncDeliverer};
use crate::util::lock_unpoisoned;

pub struct EventBus {
    admin: Arc<EventAdmin>,
    config: Mutex<BusConfig>,
}

impl EventBus {
    /**
     * Builds and starts a bus over the given registry.
     *
     * The sync pool is sized `thread_pool_size`, the async pool
     * derives from it, and the configured log level becomes the
     * ceiling for the bus's own log output.
     */
    pub fn start(registry: Arc<dyn HandlerRegistry>, config: BusConfig) -> Self {
        log::set_max_level(config.log_level);

        let sync_pool = PooledExecutor::new("herald-sync", config.thread_pool_size);
        let async_pool = PooledExecutor::new("herald-async", config.async_pool_size());

        let factory = Arc::new(HandlerTaskFactory::new(registry, &config));
        let sync = Arc::new(SyncDeliverer::new(
            Arc::clone(&sync_pool),
            config.effective_timeout(),
            config.ignore_timeout_kinds.clone(),
        ));
        let async_deliverer = AsyncDeliverer::new(Arc::clone(&async_pool), Arc::clone(&sync));

        let admin = Arc::new(EventAdmin::new(
            factory,
            sync,
            async_deliverer,
            sync_pool,
            async_pool,
        ));

        log::debug!(
            "event bus started (pool={}, cache={}, timeout={}ms)",
            config.thread_pool_size,
            config.cache_size,
            config.timeout_ms
        );

        Self {
            admin,
            config: Mutex::new(config),
        }
    }

    /// The admin façade, shareable with producers and bridges.
    pub fn admin(&self) -> Arc<EventAdmin> {
        Arc::clone(&self.admin)
    }

    pub fn post_event(&self, event: Event) -> BusResult<()> {
        self.admin.post_event(event)
    }

    pub fn send_event(&self, event: Event) -> BusResult<()> {
        self.admin.send_event(event)
    }

    /// Applies a new configuration snapshot.
    pub fn update(&self, config: BusConfig) {
        log::set_max_level(config.log_level);
        self.admin.update(&config);
        *lock_unpoisoned(&self.config) = config;
    }

    pub fn config(&self) -> BusConfig {
        lock_unpoisoned(&self.config).clone()
    }

    /// Stops the bus; see `EventAdmin::stop`. Idempotent, also run on
    /// drop.
    pub fn stop(&self) {
        self.admin.stop();
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// End-to-end scenarios
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BusError;
    use crate::event::{Properties, Value};
    use crate::handler::registry::{EventHandler, LocalHandlerRegistry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    fn event_kv(topic: &str, key: &str, value: &str) -> Event {
        let mut props = Properties::new();
        props.insert(key.into(), Value::Str(value.into()));
        Event::new(topic, props).expect("valid topic")
    }

    fn recorder(
        tx: crossbeam_channel::Sender<String>,
        tag: &'static str,
    ) -> Arc<dyn EventHandler> {
        Arc::new(move |event: &Event| {
            tx.send(format!("{tag}:{}", event.topic())).expect("record");
            Ok(())
        })
    }

    fn start_bus(registry: &Arc<LocalHandlerRegistry>, config: BusConfig) -> EventBus {
        let as_registry: Arc<dyn HandlerRegistry> = Arc::clone(registry) as Arc<dyn HandlerRegistry>;
        EventBus::start(as_registry, config)
    }

    /**
     * Async fan-out: masks and predicates decide exactly who receives
     * the event, each matching handler exactly once.
     */
    #[test]
    fn test_async_fan_out_with_predicates() {
        let registry = Arc::new(LocalHandlerRegistry::new());
        let (tx, rx) = crossbeam_channel::unbounded();

        registry
            .register(vec!["org/example/*".into()], None, "h1", recorder(tx.clone(), "h1"))
            .expect("h1");
        registry
            .register(vec!["org/example/X".into()], None, "h2", recorder(tx.clone(), "h2"))
            .expect("h2");
        registry
            .register(vec!["org/other/*".into()], None, "h3", recorder(tx.clone(), "h3"))
            .expect("h3");
        registry
            .register(
                vec!["org/example/*".into()],
                Some("(k=v)".into()),
                "h4",
                recorder(tx.clone(), "h4"),
            )
            .expect("h4");
        registry
            .register(
                vec!["org/example/*".into()],
                Some("(k=w)".into()),
                "h5",
                recorder(tx.clone(), "h5"),
            )
            .expect("h5");

        let mut config = BusConfig::default();
        config.thread_pool_size = 8;
        config.timeout_ms = 5000;
        let bus = start_bus(&registry, config);

        bus.post_event(event_kv("org/example/X", "k", "v"))
            .expect("post");

        let mut received = Vec::new();
        while let Ok(entry) = rx.recv_timeout(Duration::from_millis(1500)) {
            received.push(entry);
        }
        received.sort();
        assert_eq!(
            received,
            vec![
                "h1:org/example/X".to_string(),
                "h2:org/example/X".to_string(),
                "h4:org/example/X".to_string()
            ]
        );
        bus.stop();
    }

    /**
     * Sync ordering: a single producer's synchronous sends are
     * observed in order, each completed before the next begins.
     */
    #[test]
    fn test_sync_ordering() {
        let registry = Arc::new(LocalHandlerRegistry::new());
        let (tx, rx) = crossbeam_channel::unbounded();
        registry
            .register(vec!["t/*".into()], None, "recorder", recorder(tx, "h"))
            .expect("register");

        let bus = start_bus(&registry, BusConfig::default());
        for topic in ["t/1", "t/2", "t/3"] {
            bus.send_event(Event::with_topic(topic).expect("event"))
                .expect("send");
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv_timeout(Duration::from_secs(5)).expect("recv"));
        }
        assert_eq!(seen, vec!["h:t/1", "h:t/2", "h:t/3"]);
        bus.stop();
    }

    /**
     * Per-producer FIFO for async posts: one thread's posts arrive in
     * posting order.
     */
    #[test]
    fn test_async_per_producer_fifo() {
        let registry = Arc::new(LocalHandlerRegistry::new());
        let (tx, rx) = crossbeam_channel::unbounded();
        registry
            .register(vec!["seq/*".into()], None, "recorder", recorder(tx, "h"))
            .expect("register");

        let bus = start_bus(&registry, BusConfig::default());
        for i in 0..20 {
            bus.post_event(Event::with_topic(format!("seq/{i}")).expect("event"))
                .expect("post");
        }

        let mut seen = Vec::new();
        for _ in 0..20 {
            seen.push(rx.recv_timeout(Duration::from_secs(5)).expect("recv"));
        }
        let expected: Vec<String> = (0..20).map(|i| format!("h:seq/{i}")).collect();
        assert_eq!(seen, expected);
        bus.stop();
    }

    /**
     * Timeout blacklisting: a handler that overruns its budget delays
     * the producer by only about the timeout, is blacklisted, and
     * receives nothing afterwards.
     */
    #[test]
    fn test_timeout_blacklists_handler() {
        let registry = Arc::new(LocalHandlerRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        registry
            .register(
                vec!["slow/*".into()],
                None,
                "sleeper",
                Arc::new(move |_: &Event| {
                    if calls2.fetch_add(1, Ordering::SeqCst) == 0 {
                        thread::sleep(Duration::from_millis(2000));
                    }
                    Ok(())
                }),
            )
            .expect("register");

        let mut config = BusConfig::default();
        config.timeout_ms = 200;
        let bus = start_bus(&registry, config);

        let started = Instant::now();
        bus.send_event(Event::with_topic("slow/e1").expect("event"))
            .expect("send e1");
        assert!(
            started.elapsed() < Duration::from_millis(1500),
            "producer was blocked for {:?}",
            started.elapsed()
        );

        bus.send_event(Event::with_topic("slow/e2").expect("event"))
            .expect("send e2");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "e2 must not be delivered");

        // let the sleeper drain before the pools shut down
        thread::sleep(Duration::from_millis(2100));
        bus.stop();
    }

    /**
     * Re-entrant synchronous send: a handler sending from inside its
     * own invocation completes inline, inner delivery first.
     */
    #[test]
    fn test_reentrant_sync_send() {
        let registry = Arc::new(LocalHandlerRegistry::new());
        let (tx, rx) = crossbeam_channel::unbounded();

        let inner_tx = tx.clone();
        registry
            .register(
                vec!["t/inner".into()],
                None,
                "inner",
                Arc::new(move |_: &Event| {
                    inner_tx.send("inner").expect("record");
                    Ok(())
                }),
            )
            .expect("inner");

        let registry_for_bus = Arc::clone(&registry);
        let bus = start_bus(&registry_for_bus, BusConfig::default());
        let admin = bus.admin();

        let outer_tx = tx;
        registry
            .register(
                vec!["t/outer".into()],
                None,
                "outer",
                Arc::new(move |_: &Event| {
                    outer_tx.send("outer-start").expect("record");
                    admin
                        .send_event(Event::with_topic("t/inner").expect("event"))
                        .expect("nested send");
                    outer_tx.send("outer-end").expect("record");
                    Ok(())
                }),
            )
            .expect("outer");

        bus.send_event(Event::with_topic("t/outer").expect("event"))
            .expect("send outer");

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv_timeout(Duration::from_secs(5)).expect("recv"));
        }
        assert_eq!(seen, vec!["outer-start", "inner", "outer-end"]);
        bus.stop();
    }

    /**
     * Runaway recursion is cut off with illegal-state instead of a
     * stack overflow.
     */
    #[test]
    fn test_nested_send_depth_is_capped() {
        let registry = Arc::new(LocalHandlerRegistry::new());
        let depth_errors = Arc::new(AtomicUsize::new(0));

        let registry_for_bus = Arc::clone(&registry);
        let bus = start_bus(&registry_for_bus, BusConfig::default());
        let admin = bus.admin();

        let errors = Arc::clone(&depth_errors);
        registry
            .register(
                vec!["loop/again".into()],
                None,
                "recursive",
                Arc::new(move |_: &Event| {
                    let nested = admin.send_event(Event::with_topic("loop/again").expect("event"));
                    if matches!(nested, Err(BusError::IllegalState(_))) {
                        errors.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(())
                }),
            )
            .expect("register");

        bus.send_event(Event::with_topic("loop/again").expect("event"))
            .expect("outer send");
        assert_eq!(depth_errors.load(Ordering::SeqCst), 1);
        bus.stop();
    }

    /**
     * A stopped bus refuses both operations, invokes nobody, and its
     * pools terminate.
     */
    #[test]
    fn test_stop_refuses_and_terminates() {
        let registry = Arc::new(LocalHandlerRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        registry
            .register(
                vec!["t/*".into()],
                None,
                "counter",
                Arc::new(move |_: &Event| {
                    calls2.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .expect("register");

        let bus = start_bus(&registry, BusConfig::default());
        bus.send_event(Event::with_topic("t/before").expect("event"))
            .expect("send");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        bus.stop();
        assert!(bus.admin().is_stopped());
        assert!(matches!(
            bus.post_event(Event::with_topic("t/after").expect("event")),
            Err(BusError::IllegalState(_))
        ));
        assert!(matches!(
            bus.send_event(Event::with_topic("t/after").expect("event")),
            Err(BusError::IllegalState(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(bus.admin().sync_pool().is_terminated());
        assert!(bus.admin().async_pool().is_terminated());

        // stop is idempotent
        bus.stop();
    }

    /**
     * Blocked-submission policies on the async pool: run-in-caller
     * executes the chain on the posting thread; abort surfaces a
     * submission failure.
     */
    #[test]
    fn test_async_pool_blocked_policies() {
        let registry = Arc::new(LocalHandlerRegistry::new());
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let (entered_tx, entered_rx) = crossbeam_channel::bounded::<()>(1);

        registry
            .register(
                vec!["block/*".into()],
                None,
                "blocker",
                Arc::new(move |_: &Event| {
                    let _ = entered_tx.send(());
                    let _ = gate_rx.recv();
                    Ok(())
                }),
            )
            .expect("blocker");

        let (thread_tx, thread_rx) = crossbeam_channel::unbounded();
        registry
            .register(
                vec!["inline/*".into()],
                None,
                "thread-witness",
                Arc::new(move |_: &Event| {
                    thread_tx.send(thread::current().id()).expect("record");
                    Ok(())
                }),
            )
            .expect("witness");

        let mut config = BusConfig::default();
        config.timeout_ms = 50; // disabled: handlers run on the chain thread
        let bus = start_bus(&registry, config);
        let async_pool = Arc::clone(bus.admin().async_pool());
        async_pool.configure(1);
        async_pool.set_max_size(1);

        // occupy the single async worker from another thread
        let admin = bus.admin();
        let blocker = thread::spawn(move || {
            admin
                .post_event(Event::with_topic("block/x").expect("event"))
                .expect("post blocker");
        });
        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker occupied");
        blocker.join().expect("blocker thread");

        // run-in-caller: the chain (and handler) run on this thread
        bus.post_event(Event::with_topic("inline/x").expect("event"))
            .expect("inline post");
        let ran_on = thread_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("inline delivery");
        assert_eq!(ran_on, thread::current().id());

        // abort: submission fails
        async_pool.set_blocked_policy(crate::dispatch::BlockedPolicy::Abort);
        let result = bus.post_event(Event::with_topic("inline/y").expect("event"));
        assert!(matches!(result, Err(BusError::PoolBlocked)));

        gate_tx.send(()).expect("release blocker");
        bus.stop();
    }

    /**
     * require_topic=false admits mask-less handlers to every event.
     */
    #[test]
    fn test_topicless_handlers_with_lax_config() {
        let registry = Arc::new(LocalHandlerRegistry::new());
        let (tx, rx) = crossbeam_channel::unbounded();
        registry
            .register(vec![], None, "all-ears", recorder(tx, "h"))
            .expect("register");

        let mut config = BusConfig::default();
        config.require_topic = false;
        let bus = start_bus(&registry, config);

        bus.send_event(Event::with_topic("any/topic").expect("event"))
            .expect("send");
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).expect("recv"),
            "h:any/topic"
        );

        // flipping the flag back excludes them again
        bus.update(BusConfig::default());
        bus.send_event(Event::with_topic("any/other").expect("event"))
            .expect("send");
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        bus.stop();
    }
}
