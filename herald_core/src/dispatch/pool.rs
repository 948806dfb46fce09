/*!
 * A tunable, lazily-grown thread pool over the hand-off queue.
 *
 * Submission policy (`execute`):
 * 1. below the minimum size, spawn a worker with the task as its
 *    first job;
 * 2. otherwise hand the task to a worker that is already parked on
 *    the queue;
 * 3. otherwise, below the maximum size, spawn;
 * 4. otherwise invoke the blocked-execution policy.
 *
 * Workers are named OS threads. Each takes from the queue with the
 * keep-alive as its patience; a worker that idles out, is interrupted,
 * or finds the pool above its maximum exits, and the pool lazily
 * replaces exited workers while tasks are queued.
 *
 * Shutdown comes in two flavours: `shutdown_now` interrupts everyone
 * and drops queued work, `shutdown_after_processing_queued` lets the
 * workers drain the queue first. `await_termination` blocks until the
 * pool is empty of threads.
 */

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::dispatch::interrupt::{self, InterruptHandle, WaitOutcome};
use crate::dispatch::queue::LinkedQueue;
use crate::error::{BusError, BusResult};
use crate::util::lock_unpoisoned;

/// A single-use unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Default patience of an idle worker before it exits.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Upper bound of one queue wait inside the worker loop; the loop
/// re-reads the pool state between slices so workers notice shutdown
/// and reconfiguration promptly.
const IDLE_SLICE: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Blocked-execution policy
// ---------------------------------------------------------------------------

/**
 * What `execute` does when it can neither hand off nor spawn.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockedPolicy {
    /// Run the task on the submitting thread (the default).
    RunInCaller,
    /// Queue the task; a worker picks it up at its next boundary.
    Wait,
    /// Silently drop the new task.
    Discard,
    /// Drop the oldest queued task, then queue the new one.
    DiscardOldest,
    /// Reject the submission with `BusError::PoolBlocked`.
    Abort,
}

// ---------------------------------------------------------------------------
// Pool state
// ---------------------------------------------------------------------------

struct PoolState {
    min_size: usize,
    max_size: usize,
    keep_alive: Option<Duration>,
    shutdown: bool,
    pool_size: usize,
    next_worker: u64,
    workers: HashMap<u64, InterruptHandle>,
    policy: BlockedPolicy,
}

/**
 * The pooled executor feeding tasks to worker threads through a
 * `LinkedQueue`.
 */
pub struct PooledExecutor {
    name: String,
    state: Mutex<PoolState>,
    terminated: Arc<Condvar>,
    hand_off: LinkedQueue<Task>,
}

impl PooledExecutor {
    /**
     * Creates a pool named `name` (worker threads are called
     * `<name>-worker-<n>`) sized `pool_size`, with the default
     * keep-alive and the run-in-caller policy.
     */
    pub fn new(name: impl Into<String>, pool_size: usize) -> Arc<Self> {
        let pool = Arc::new(Self {
            name: name.into(),
            state: Mutex::new(PoolState {
                min_size: 1,
                max_size: 1,
                keep_alive: Some(DEFAULT_KEEP_ALIVE),
                shutdown: false,
                pool_size: 0,
                next_worker: 0,
                workers: HashMap::new(),
                policy: BlockedPolicy::RunInCaller,
            }),
            terminated: Arc::new(Condvar::new()),
            hand_off: LinkedQueue::new(),
        });
        pool.configure(pool_size);
        pool
    }

    /**
     * Applies a new target size: minimum `pool_size`, maximum
     * `pool_size + 10`. Excess workers exit at their next task
     * boundary; missing ones are spawned on demand.
     */
    pub fn configure(&self, pool_size: usize) {
        let mut state = lock_unpoisoned(&self.state);
        if state.shutdown {
            return;
        }
        state.min_size = pool_size;
        state.max_size = pool_size + 10;
    }

    pub fn set_keep_alive(&self, keep_alive: Option<Duration>) {
        lock_unpoisoned(&self.state).keep_alive = keep_alive;
    }

    /// Sets the minimum size directly. Prefer `configure` for the
    /// standard min/max pairing.
    pub fn set_min_size(&self, min_size: usize) {
        lock_unpoisoned(&self.state).min_size = min_size;
    }

    /// Sets the maximum size directly. Workers beyond the new maximum
    /// terminate at their next task boundary.
    pub fn set_max_size(&self, max_size: usize) {
        lock_unpoisoned(&self.state).max_size = max_size;
    }

    pub fn set_blocked_policy(&self, policy: BlockedPolicy) {
        lock_unpoisoned(&self.state).policy = policy;
    }

    pub fn pool_size(&self) -> usize {
        lock_unpoisoned(&self.state).pool_size
    }

    pub fn min_size(&self) -> usize {
        lock_unpoisoned(&self.state).min_size
    }

    pub fn max_size(&self) -> usize {
        lock_unpoisoned(&self.state).max_size
    }

    pub fn queued(&self) -> usize {
        self.hand_off.len()
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /**
     * Arranges for `task` to run on a pool thread.
     *
     * Returns once the task has been handed off (or run, under the
     * run-in-caller policy). After shutdown, and when the pool is
     * saturated, the blocked policy decides; only `Abort` makes this
     * an error.
     */
    pub fn execute(self: &Arc<Self>, task: Task) -> BusResult<()> {
        let (task, policy) = {
            let mut state = lock_unpoisoned(&self.state);
            if state.shutdown {
                (task, state.policy)
            } else {
                if state.pool_size < state.min_size {
                    self.add_worker(&mut state, Some(task));
                    return Ok(());
                }
                match self.hand_off.offer_to_waiter(task) {
                    Ok(()) => return Ok(()),
                    Err(returned) => {
                        if state.pool_size < state.max_size {
                            self.add_worker(&mut state, Some(returned));
                            return Ok(());
                        }
                        (returned, state.policy)
                    }
                }
            }
        };

        /*
         * Saturated (or shut down): the blocked policy takes over.
         * The state lock is released here; handlers may run arbitrary
         * code on this thread.
         */
        match policy {
            BlockedPolicy::RunInCaller => {
                task();
                Ok(())
            }
            BlockedPolicy::Wait => {
                if lock_unpoisoned(&self.state).shutdown {
                    return Ok(());
                }
                self.hand_off.put(task)?;
                Ok(())
            }
            BlockedPolicy::Discard => Ok(()),
            BlockedPolicy::DiscardOldest => {
                let dropped = self.hand_off.poll(Duration::ZERO)?;
                if dropped.is_some() {
                    log::debug!("pool '{}': discarded oldest queued task", self.name);
                }
                self.hand_off.put(task)?;
                Ok(())
            }
            BlockedPolicy::Abort => Err(BusError::PoolBlocked),
        }
    }

    /**
     * Strict hand-off used by the timeout machinery: the task must end
     * up on a *different* thread. Never consults the blocked policy
     * and never runs the task in the caller; if no worker can take it,
     * the task is handed back.
     */
    pub fn execute_for_handoff(self: &Arc<Self>, task: Task) -> Result<(), Task> {
        let mut state = lock_unpoisoned(&self.state);
        if state.shutdown {
            return Err(task);
        }
        if state.pool_size < state.min_size {
            self.add_worker(&mut state, Some(task));
            return Ok(());
        }
        match self.hand_off.offer_to_waiter(task) {
            Ok(()) => Ok(()),
            Err(returned) => {
                if state.pool_size < state.max_size {
                    self.add_worker(&mut state, Some(returned));
                    Ok(())
                } else {
                    Err(returned)
                }
            }
        }
    }

    /**
     * Pre-starts up to `count` workers, bounded by the maximum size.
     * Returns how many were actually created.
     */
    pub fn create_threads(self: &Arc<Self>, count: usize) -> usize {
        let mut state = lock_unpoisoned(&self.state);
        let mut created = 0;
        while created < count && !state.shutdown && state.pool_size < state.max_size {
            self.add_worker(&mut state, None);
            created += 1;
        }
        created
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Interrupts every worker. Workers exit at their next task
    /// boundary or wait.
    pub fn interrupt_all(&self) {
        let state = lock_unpoisoned(&self.state);
        for handle in state.workers.values() {
            handle.interrupt();
        }
    }

    /**
     * Stops the pool immediately: no new tasks, no new workers, every
     * worker interrupted. Queued tasks are left for `drain`.
     */
    pub fn shutdown_now(&self) {
        let mut state = lock_unpoisoned(&self.state);
        state.policy = BlockedPolicy::Discard;
        state.shutdown = true;
        state.min_size = 0;
        state.max_size = 0;
        for handle in state.workers.values() {
            handle.interrupt();
        }
    }

    /**
     * Stops the pool once the queue is drained: no new tasks are
     * accepted, busy workers finish their work and then consume
     * whatever is queued before exiting.
     */
    pub fn shutdown_after_processing_queued(&self) {
        let mut state = lock_unpoisoned(&self.state);
        state.policy = BlockedPolicy::Discard;
        state.shutdown = true;
        if state.pool_size == 0 {
            state.min_size = 0;
            state.max_size = 0;
        }
    }

    pub fn is_shutdown(&self) -> bool {
        lock_unpoisoned(&self.state).shutdown
    }

    /// Whether a requested shutdown has completed.
    pub fn is_terminated(&self) -> bool {
        let state = lock_unpoisoned(&self.state);
        state.shutdown && state.pool_size == 0
    }

    /**
     * Blocks until the pool has no threads left, or the deadline
     * expires. `None` waits indefinitely.
     *
     * # Returns
     * `Ok(true)` if terminated, `Ok(false)` on deadline expiry.
     * *Illegal-state* if shutdown was never requested.
     */
    pub fn await_termination(&self, timeout: Option<Duration>) -> BusResult<bool> {
        let mut state = lock_unpoisoned(&self.state);
        if !state.shutdown {
            return Err(BusError::IllegalState(
                "shutdown has not been requested".into(),
            ));
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if state.pool_size == 0 {
                return Ok(true);
            }
            let remaining = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Ok(false);
                    }
                    Some(d - now)
                }
                None => None,
            };
            let (guard, outcome) = interrupt::wait_on(&self.terminated, state, remaining);
            state = guard;
            if outcome == WaitOutcome::Interrupted {
                return Err(BusError::Interrupted);
            }
        }
    }

    /**
     * Shuts down immediately and waits for full termination,
     * swallowing interrupts. Used when tearing the bus down.
     */
    pub fn close(&self) {
        self.shutdown_now();
        loop {
            match self.await_termination(None) {
                Ok(_) => return,
                Err(BusError::Interrupted) => continue,
                Err(_) => return,
            }
        }
    }

    /**
     * Removes and returns all queued tasks without running them.
     */
    pub fn drain(&self) -> Vec<Task> {
        let mut tasks = Vec::new();
        let mut was_interrupted = false;
        loop {
            match self.hand_off.poll(Duration::ZERO) {
                Ok(Some(task)) => tasks.push(task),
                Ok(None) => break,
                Err(_) => {
                    // postpone the re-interrupt until drained
                    was_interrupted = true;
                }
            }
        }
        if was_interrupted {
            interrupt::current().interrupt();
        }
        tasks
    }

    // -----------------------------------------------------------------------
    // Workers
    // -----------------------------------------------------------------------

    /**
     * Spawns a worker with an optional first task. The caller holds
     * the state lock; the book-keeping (size, handle) is done before
     * the thread starts so `interrupt_all` can always reach it.
     */
    fn add_worker(self: &Arc<Self>, state: &mut MutexGuard<'_, PoolState>, first: Option<Task>) {
        let id = state.next_worker;
        state.next_worker += 1;

        let handle = InterruptHandle::detached();
        state.workers.insert(id, handle.clone());
        state.pool_size += 1;

        let pool = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("{}-worker-{id}", self.name))
            .spawn(move || {
                interrupt::adopt(&handle);
                Self::worker_loop(&pool, id, first);
            });

        if let Err(err) = spawned {
            // roll the book-keeping back; the task is lost with the thread
            state.workers.remove(&id);
            state.pool_size -= 1;
            log::warn!("pool '{}': failed to spawn worker: {err}", self.name);
        }
    }

    /**
     * The worker body: run the first task, then drain the queue until
     * idle beyond keep-alive, interrupted, shut down, or above the
     * maximum size. A panicking task ends the worker; a replacement is
     * spawned lazily by `worker_done`.
     */
    fn worker_loop(pool: &Arc<Self>, id: u64, first: Option<Task>) {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            if let Some(task) = first {
                task();
            }
            loop {
                match pool.next_task() {
                    Ok(Some(task)) => task(),
                    Ok(None) => break,
                    Err(_) => break, // interrupted
                }
            }
        }));

        if outcome.is_err() {
            log::warn!(
                "pool '{}': worker {id} crashed; continuing with a fresh thread",
                pool.name
            );
        }
        pool.worker_done(id);
    }

    /**
     * Fetches the next task for a worker, or `None` when the worker
     * should exit. Waits in slices so state changes (shutdown, size
     * reduction) are observed within `IDLE_SLICE` even while idle.
     */
    fn next_task(&self) -> BusResult<Option<Task>> {
        let idle_since = Instant::now();
        loop {
            let budget = {
                let state = lock_unpoisoned(&self.state);
                if state.pool_size > state.max_size {
                    // too many threads: die at this boundary
                    return Ok(None);
                }
                if state.shutdown {
                    // drain whatever is queued, then exit
                    return self.hand_off.poll(Duration::ZERO);
                }
                state.keep_alive
            };

            let slice = match budget {
                Some(keep_alive) => {
                    let idle = idle_since.elapsed();
                    if idle >= keep_alive {
                        return Ok(None);
                    }
                    (keep_alive - idle).min(IDLE_SLICE)
                }
                None => IDLE_SLICE,
            };

            if let Some(task) = self.hand_off.poll(slice)? {
                return Ok(Some(task));
            }
        }
    }

    /**
     * Book-keeping after a worker exits; spawns a lazy replacement
     * when the pool dropped below its minimum while work is queued.
     */
    fn worker_done(self: &Arc<Self>, id: u64) {
        let mut state = lock_unpoisoned(&self.state);
        state.workers.remove(&id);
        state.pool_size -= 1;

        if state.shutdown {
            if state.pool_size == 0 {
                state.min_size = 0;
                state.max_size = 0;
            }
            self.terminated.notify_all();
            return;
        }

        if state.pool_size == 0 || state.pool_size < state.min_size {
            if let Ok(Some(task)) = self.hand_off.poll(Duration::ZERO) {
                self.add_worker(&mut state, Some(task));
            }
        }
    }
}
