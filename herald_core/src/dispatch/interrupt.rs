/*!
 * Cooperative thread interruption.
 *
 * Every thread owns an interrupt signal: an atomic flag plus a record
 * of the condition variable it is currently blocked on, if any.
 * `InterruptHandle::interrupt()` sets the flag and wakes that condvar,
 * so a blocked `take`/`poll`/rendezvous wait observes the interrupt
 * promptly instead of sleeping out its deadline.
 *
 * The flag follows the usual read-and-clear discipline: a wait that
 * reports `Interrupted` has already cleared the flag, and the static
 * `interrupted()` clears it as well. Code that must keep an interrupt
 * pending for a later checkpoint re-raises it via `current().interrupt()`.
 *
 * Waits are sliced internally (`WAIT_SLICE`): a signal that races past
 * the registration window is still observed within one slice, without
 * any cost on the producer/consumer fast path (those notifications are
 * issued under the paired mutex and cannot be lost).
 */

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::util::lock_unpoisoned;

/// Upper bound on a single condvar sleep. Bounds the latency of an
/// interrupt that raced past the wait registration.
const WAIT_SLICE: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Per-thread signal
// ---------------------------------------------------------------------------

struct ThreadSignal {
    /// Latched by `interrupt()`, cleared by whoever observes it.
    interrupted: AtomicBool,

    /// The condvar the owning thread is currently blocked on, if any.
    waiting_on: Mutex<Option<Arc<Condvar>>>,
}

impl ThreadSignal {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            interrupted: AtomicBool::new(false),
            waiting_on: Mutex::new(None),
        })
    }
}

thread_local! {
    static SIGNAL: RefCell<Arc<ThreadSignal>> = RefCell::new(ThreadSignal::new());
}

fn current_signal() -> Arc<ThreadSignal> {
    SIGNAL.with(|cell| Arc::clone(&cell.borrow()))
}

// ---------------------------------------------------------------------------
// Public surface
// ---------------------------------------------------------------------------

/**
 * A handle to one thread's interrupt signal. Cloneable and sendable;
 * pool workers hand their handle out so a timed-out caller can
 * interrupt them from outside.
 */
#[derive(Clone)]
pub struct InterruptHandle {
    signal: Arc<ThreadSignal>,
}

impl InterruptHandle {
    /**
     * Creates a handle not yet bound to any thread. A spawned worker
     * adopts it as its own signal via `adopt()`, which closes the gap
     * between registering a worker and being able to interrupt it.
     */
    pub fn detached() -> Self {
        Self {
            signal: ThreadSignal::new(),
        }
    }

    /**
     * Interrupts the owning thread: latches the flag and, if the
     * thread is blocked in an interruptible wait, wakes it.
     */
    pub fn interrupt(&self) {
        self.signal.interrupted.store(true, Ordering::SeqCst);
        let waiting = lock_unpoisoned(&self.signal.waiting_on).clone();
        if let Some(cond) = waiting {
            cond.notify_all();
        }
    }

    /// Reads the flag without clearing it.
    pub fn is_interrupted(&self) -> bool {
        self.signal.interrupted.load(Ordering::SeqCst)
    }
}

/// Returns a handle to the calling thread's signal.
pub fn current() -> InterruptHandle {
    InterruptHandle {
        signal: current_signal(),
    }
}

/// Binds `handle` to the calling thread. Used by pool workers right
/// after spawning.
pub fn adopt(handle: &InterruptHandle) {
    SIGNAL.with(|cell| *cell.borrow_mut() = Arc::clone(&handle.signal));
}

/**
 * Tests and clears the calling thread's interrupt flag.
 */
pub fn interrupted() -> bool {
    current_signal().interrupted.swap(false, Ordering::SeqCst)
}

// ---------------------------------------------------------------------------
// Interruptible condvar wait
// ---------------------------------------------------------------------------

/// How an interruptible wait ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Woken by a notification (or spuriously; callers re-check their
    /// predicate in a loop).
    Notified,
    /// The timeout elapsed.
    TimedOut,
    /// The thread was interrupted; the flag has been cleared.
    Interrupted,
}

/**
 * Waits on `cond` with the given guard, observing interrupts.
 *
 * The guard's mutex is released while sleeping and re-acquired before
 * returning, exactly like `Condvar::wait_timeout`. `timeout == None`
 * waits until notified or interrupted.
 */
pub fn wait_on<'a, T>(
    cond: &Arc<Condvar>,
    mut guard: MutexGuard<'a, T>,
    timeout: Option<Duration>,
) -> (MutexGuard<'a, T>, WaitOutcome) {
    let signal = current_signal();

    if signal.interrupted.swap(false, Ordering::SeqCst) {
        return (guard, WaitOutcome::Interrupted);
    }

    *lock_unpoisoned(&signal.waiting_on) = Some(Arc::clone(cond));
    let deadline = timeout.map(|t| Instant::now() + t);

    let outcome = loop {
        /*
         * Sleep at most one slice, so an interrupt that latched the
         * flag without catching us registered is seen on the next
         * iteration.
         */
        let slice = match deadline {
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    break WaitOutcome::TimedOut;
                }
                (d - now).min(WAIT_SLICE)
            }
            None => WAIT_SLICE,
        };

        let (g, timed_out) = match cond.wait_timeout(guard, slice) {
            Ok((g, result)) => (g, result.timed_out()),
            Err(poisoned) => {
                let (g, result) = poisoned.into_inner();
                (g, result.timed_out())
            }
        };
        guard = g;

        if signal.interrupted.swap(false, Ordering::SeqCst) {
            break WaitOutcome::Interrupted;
        }
        if !timed_out {
            break WaitOutcome::Notified;
        }
    };

    *lock_unpoisoned(&signal.waiting_on) = None;
    (guard, outcome)
}
