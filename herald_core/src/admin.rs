/*!
 * The event-admin façade.
 *
 * `post_event` and `send_event` run the matcher, build the handler
 * tasks, and hand them to the async or sync deliverer. `stop()` is a
 * terminal transition: subsequent calls fail with *illegal-state* and
 * no further handler task is ever created.
 *
 * Top-level synchronous sends are driven on the sync-master thread;
 * sends issued from inside a running delivery frame are detected via
 * the per-thread frame counter and run inline, which is what makes
 * re-entrant handler graphs safe.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::BusConfig;
use crate::dispatch::pool::PooledExecutor;
use crate::dispatch::sync_master::SyncMaster;
use crate::error::{BusError, BusResult};
use crate::event::Event;
use crate::handler::matcher::HandlerTaskFactory;
use crate::tasks::sync_deliver::{self, SyncDeliverer};
use crate::tasks::{AsyncDeliverer, HandlerTask};

pub struct EventAdmin {
    stopped: AtomicBool,
    factory: Arc<HandlerTaskFactory>,
    sync: Arc<SyncDeliverer>,
    async_deliverer: AsyncDeliverer,
    sync_master: SyncMaster,
    sync_pool: Arc<PooledExecutor>,
    async_pool: Arc<PooledExecutor>,
}

impl EventAdmin {
    pub fn new(
        factory: Arc<HandlerTaskFactory>,
        sync: Arc<SyncDeliverer>,
        async_deliverer: AsyncDeliverer,
        sync_pool: Arc<PooledExecutor>,
        async_pool: Arc<PooledExecutor>,
    ) -> Self {
        Self {
            stopped: AtomicBool::new(false),
            factory,
            sync,
            async_deliverer,
            sync_master: SyncMaster::new(),
            sync_pool,
            async_pool,
        }
    }

    /**
     * Posts an event asynchronously: returns once the delivery has
     * been queued, preserving FIFO order per posting thread.
     */
    pub fn post_event(&self, event: Event) -> BusResult<()> {
        let tasks = self.plan(event)?;
        if tasks.is_empty() {
            return Ok(());
        }
        self.async_deliverer.execute(tasks)
    }

    /**
     * Sends an event synchronously: blocks until every matching
     * handler has completed or been timed out and blacklisted.
     */
    pub fn send_event(&self, event: Event) -> BusResult<()> {
        let tasks = self.plan(event)?;
        if tasks.is_empty() {
            return Ok(());
        }
        if sync_deliver::in_frame() {
            // nested send from inside a handler: stay on this thread
            return self.sync.execute(tasks);
        }
        let sync = Arc::clone(&self.sync);
        self.sync_master
            .run_sync(Box::new(move || sync.execute(tasks)))
    }

    /// Matching happens only while running; a stopped bus refuses
    /// before any task exists.
    fn plan(&self, event: Event) -> BusResult<Vec<Arc<HandlerTask>>> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(BusError::stopped());
        }
        Ok(self.factory.create_handler_tasks(event))
    }

    /**
     * Stops the bus: flips the terminal state, retires the
     * sync-master, and shuts both pools down after their queued work
     * has been processed, waiting for full termination. Idempotent.
     */
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.sync_master.stop();
        self.sync_pool.shutdown_after_processing_queued();
        self.async_pool.shutdown_after_processing_queued();
        for pool in [&self.sync_pool, &self.async_pool] {
            loop {
                match pool.await_termination(None) {
                    Err(BusError::Interrupted) => continue,
                    _ => break,
                }
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /**
     * Applies a configuration snapshot atomically: cache sizes, topic
     * requirement, timeout and exemptions, pool sizes. Workers observe
     * the new values at their next task boundary.
     */
    pub fn update(&self, config: &BusConfig) {
        self.factory.update(config);
        self.sync.update(
            config.effective_timeout(),
            config.ignore_timeout_kinds.clone(),
        );
        self.sync_pool.configure(config.thread_pool_size);
        self.async_pool.configure(config.async_pool_size());
    }

    pub fn sync_pool(&self) -> &Arc<PooledExecutor> {
        &self.sync_pool
    }

    pub fn async_pool(&self) -> &Arc<PooledExecutor> {
        &self.async_pool
    }
}
