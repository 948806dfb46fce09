/*!
 * Asynchronous delivery: fire-and-forget with per-producer FIFO.
 *
 * Events posted by one thread are delivered in posting order. The
 * mechanism is a *chain* per producing thread: the first post submits
 * a drain loop to the async pool and registers it in a
 * `producer → queue` map; subsequent posts from the same thread
 * append to the queue instead of submitting anything. When the queue
 * runs dry the chain removes itself, and the next post starts a new
 * one. Different producers get different chains, so they are not
 * serialised through a single worker.
 *
 * Each batch is driven through the sync deliverer on the chain's pool
 * thread, so the timeout machinery applies per handler and a handler
 * sending synchronously from inside an async delivery is inlined.
 */

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use crate::dispatch::pool::PooledExecutor;
use crate::error::BusResult;
use crate::tasks::sync_deliver::SyncDeliverer;
use crate::tasks::HandlerTask;
use crate::util::lock_unpoisoned;

type Batch = Vec<Arc<HandlerTask>>;
type ChainMap = Mutex<HashMap<ThreadId, VecDeque<Batch>>>;

pub struct AsyncDeliverer {
    pool: Arc<PooledExecutor>,
    sync: Arc<SyncDeliverer>,
    chains: Arc<ChainMap>,
}

impl AsyncDeliverer {
    pub fn new(pool: Arc<PooledExecutor>, sync: Arc<SyncDeliverer>) -> Self {
        Self {
            pool,
            sync,
            chains: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /**
     * Queues a batch of handler tasks for delivery and returns
     * immediately. Batches from the same producing thread are
     * delivered in submission order.
     */
    pub fn execute(&self, tasks: Batch) -> BusResult<()> {
        let producer = thread::current().id();

        let start_chain = {
            let mut chains = lock_unpoisoned(&self.chains);
            match chains.get_mut(&producer) {
                Some(queue) => {
                    // a chain is draining this producer: just append
                    queue.push_back(tasks);
                    false
                }
                None => {
                    chains.insert(producer, VecDeque::from([tasks]));
                    true
                }
            }
        };
        if !start_chain {
            return Ok(());
        }

        let chains = Arc::clone(&self.chains);
        let sync = Arc::clone(&self.sync);
        let submitted = self
            .pool
            .execute(Box::new(move || Self::drain(&chains, &sync, producer)));

        if let Err(err) = &submitted {
            /*
             * The chain never started (abort policy). Remove the
             * stranded queue so later posts from this producer can
             * start a fresh chain.
             */
            lock_unpoisoned(&self.chains).remove(&producer);
            log::warn!("failed to start an asynchronous delivery chain: {err}");
        }
        submitted
    }

    /**
     * The chain body. Removal and the empty check happen under the
     * same lock, so a concurrent post either lands in this chain or
     * observes it gone; batches are never stranded.
     */
    fn drain(chains: &ChainMap, sync: &SyncDeliverer, producer: ThreadId) {
        loop {
            let batch = {
                let mut map = lock_unpoisoned(chains);
                match map.get_mut(&producer).and_then(VecDeque::pop_front) {
                    Some(batch) => batch,
                    None => {
                        map.remove(&producer);
                        break;
                    }
                }
            };
            if let Err(err) = sync.execute(batch) {
                log::warn!("asynchronous delivery frame failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use crate::event::{Event, Properties};
    use crate::handler::matcher::HandlerTaskFactory;
    use crate::handler::registry::{HandlerRegistry, LocalHandlerRegistry};
    use std::time::Duration;

    struct Fixture {
        registry: Arc<LocalHandlerRegistry>,
        factory: Arc<HandlerTaskFactory>,
        deliverer: AsyncDeliverer,
        pool: Arc<PooledExecutor>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(LocalHandlerRegistry::new());
        let as_registry: Arc<dyn HandlerRegistry> = Arc::clone(&registry) as Arc<dyn HandlerRegistry>;
        let factory = Arc::new(HandlerTaskFactory::new(as_registry, &BusConfig::default()));
        let pool = PooledExecutor::new("test-async", 4);
        let sync_pool = PooledExecutor::new("test-async-sync", 4);
        let sync = Arc::new(SyncDeliverer::new(
            sync_pool,
            Some(Duration::from_secs(5)),
            vec![],
        ));
        let deliverer = AsyncDeliverer::new(Arc::clone(&pool), sync);
        Fixture {
            registry,
            factory,
            deliverer,
            pool,
        }
    }

    fn topic_tasks(fixture: &Fixture, topic: &str) -> Vec<Arc<HandlerTask>> {
        let event = Event::new(topic, Properties::new()).expect("event");
        fixture.factory.create_handler_tasks(event)
    }

    /**
     * Batches posted by one thread arrive in posting order, even
     * though delivery happens on pool threads.
     */
    #[test]
    fn test_per_producer_fifo() {
        let fixture = fixture();
        let (tx, rx) = crossbeam_channel::unbounded();
        fixture
            .registry
            .register(
                vec!["seq/*".into()],
                None,
                "recorder",
                Arc::new(move |event: &Event| {
                    tx.send(event.topic().to_string()).expect("record");
                    Ok(())
                }),
            )
            .expect("register");

        for i in 0..10 {
            let batch = topic_tasks(&fixture, &format!("seq/{i}"));
            fixture.deliverer.execute(batch).expect("post");
        }

        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.push(rx.recv_timeout(Duration::from_secs(5)).expect("delivery"));
        }
        let expected: Vec<String> = (0..10).map(|i| format!("seq/{i}")).collect();
        assert_eq!(seen, expected);
        fixture.pool.close();
    }

    /**
     * Once a producer's chain drains, the map entry is gone and a
     * later post starts a fresh chain that still delivers.
     */
    #[test]
    fn test_chain_retires_and_restarts() {
        let fixture = fixture();
        let (tx, rx) = crossbeam_channel::unbounded();
        fixture
            .registry
            .register(
                vec!["r/*".into()],
                None,
                "recorder",
                Arc::new(move |event: &Event| {
                    tx.send(event.topic().to_string()).expect("record");
                    Ok(())
                }),
            )
            .expect("register");

        fixture
            .deliverer
            .execute(topic_tasks(&fixture, "r/one"))
            .expect("post");
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).expect("delivery"),
            "r/one"
        );

        // wait for the chain to retire
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if lock_unpoisoned(&fixture.deliverer.chains).is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(lock_unpoisoned(&fixture.deliverer.chains).is_empty());

        fixture
            .deliverer
            .execute(topic_tasks(&fixture, "r/two"))
            .expect("post");
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).expect("delivery"),
            "r/two"
        );
        fixture.pool.close();
    }
}
