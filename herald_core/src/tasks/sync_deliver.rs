/*!
 * Synchronous delivery: the caller's timeline.
 *
 * Each task in a frame is delivered one of two ways:
 *
 * - *inline* on the current thread, when the timeout machinery is
 *   disabled (globally, for the handler's kind, or because this
 *   thread is already inside a sync frame);
 * - *supervised*: the task is handed to the sync pool wrapped with a
 *   fresh rendezvous, and the caller waits on the rendezvous with the
 *   configured deadline. Expiry blacklists the handler, interrupts the
 *   worker stuck in it, and moves on; the timeout never surfaces to
 *   the producer.
 *
 * Re-entrancy is tracked with a per-thread frame counter: a handler
 * that sends synchronously from inside its own invocation is served
 * inline, preserving strict LIFO nesting without consuming pool
 * threads. Depth is capped; a handler graph that recurses past the
 * cap gets *illegal-state* instead of a stack overflow.
 */

use std::cell::Cell;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::dispatch::pool::PooledExecutor;
use crate::dispatch::rendezvous::Rendezvous;
use crate::error::{BusError, BusResult};
use crate::tasks::HandlerTask;
use crate::util::{read_unpoisoned, write_unpoisoned};

/// Hard cap on nested synchronous sends per thread.
const MAX_NESTED_FRAMES: usize = 32;

thread_local! {
    static FRAME_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Whether the current thread is inside a synchronous delivery frame.
pub fn in_frame() -> bool {
    FRAME_DEPTH.with(Cell::get) > 0
}

/// Increments the frame counter for its lifetime; panic safe.
struct FrameGuard;

impl FrameGuard {
    fn enter() -> Self {
        FRAME_DEPTH.with(|depth| depth.set(depth.get() + 1));
        FrameGuard
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        FRAME_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

struct TimeoutSettings {
    /// `None` disables the timeout machinery entirely.
    timeout: Option<Duration>,
    /// Handler kinds exempt from supervision.
    ignore_kinds: Vec<String>,
}

// ---------------------------------------------------------------------------
// SyncDeliverer
// ---------------------------------------------------------------------------

pub struct SyncDeliverer {
    pool: Arc<PooledExecutor>,
    settings: RwLock<TimeoutSettings>,
}

impl SyncDeliverer {
    pub fn new(
        pool: Arc<PooledExecutor>,
        timeout: Option<Duration>,
        ignore_kinds: Vec<String>,
    ) -> Self {
        Self {
            pool,
            settings: RwLock::new(TimeoutSettings {
                timeout,
                ignore_kinds,
            }),
        }
    }

    /// Swaps in a new timeout configuration; frames already running
    /// keep the settings they started with per task.
    pub fn update(&self, timeout: Option<Duration>, ignore_kinds: Vec<String>) {
        let mut settings = write_unpoisoned(&self.settings);
        settings.timeout = timeout;
        settings.ignore_kinds = ignore_kinds;
    }

    /**
     * Delivers a frame of handler tasks on the caller's timeline.
     * Returns once every task has completed or been timed out and
     * blacklisted.
     */
    pub fn execute(&self, tasks: Vec<Arc<HandlerTask>>) -> BusResult<()> {
        if FRAME_DEPTH.with(Cell::get) >= MAX_NESTED_FRAMES {
            return Err(BusError::IllegalState(format!(
                "nested synchronous send depth exceeded ({MAX_NESTED_FRAMES})"
            )));
        }
        let nested = in_frame();

        for task in tasks {
            let supervision = if nested {
                None
            } else {
                self.supervision_for(&task)
            };
            match supervision {
                Some(limit) => self.deliver_supervised(task, limit),
                None => Self::deliver_inline(&task),
            }
        }
        Ok(())
    }

    /// The timeout to apply to this task, or `None` for inline
    /// delivery.
    fn supervision_for(&self, task: &HandlerTask) -> Option<Duration> {
        let settings = read_unpoisoned(&self.settings);
        let limit = settings.timeout?;
        if settings.ignore_kinds.iter().any(|k| k == task.kind()) {
            return None;
        }
        Some(limit)
    }

    fn deliver_inline(task: &HandlerTask) {
        let _frame = FrameGuard::enter();
        task.execute();
    }

    /**
     * Runs the task on a sync-pool thread and waits for it with a
     * deadline. The rendezvous latches on expiry, so the abandoned
     * worker passes through its `meet` whenever the handler finally
     * returns.
     */
    fn deliver_supervised(&self, task: Arc<HandlerTask>, limit: Duration) {
        let rendezvous = Arc::new(Rendezvous::new());

        let worker_task = {
            let task = Arc::clone(&task);
            let rendezvous = Arc::clone(&rendezvous);
            Box::new(move || {
                {
                    let _frame = FrameGuard::enter();
                    task.execute();
                }
                rendezvous.meet();
            })
        };

        match self.pool.execute_for_handoff(worker_task) {
            Ok(()) => match rendezvous.meet_with_timeout(limit) {
                Ok(()) => {}
                Err(BusError::TimedOut(ms)) => {
                    task.blacklist_handler(&format!("exceeded the {ms} ms delivery timeout"));
                }
                Err(other) => {
                    log::debug!(
                        "supervised delivery to handler {} ended abnormally: {other}",
                        task.id()
                    );
                }
            },
            Err(unused) => {
                /*
                 * No spare thread to supervise with. Dropping the
                 * wrapper (and its rendezvous) is safe because nobody
                 * has met it yet; deliver inline without a timeout.
                 */
                drop(unused);
                log::debug!(
                    "sync pool saturated; delivering to handler {} inline",
                    task.id()
                );
                Self::deliver_inline(&task);
            }
        }
    }
}
