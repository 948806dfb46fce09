/*!
 * Cyclic barrier and the two-party rendezvous built on it.
 *
 * The barrier uses an all-or-none breakage model: a party leaving
 * early (interrupt or timeout) marks the barrier broken and releases
 * everyone else abnormally, until `restart()`.
 *
 * `Rendezvous` is the two-party specialisation the sync deliverer
 * uses. Its extra latch makes a timed-out rendezvous permanently
 * satisfied: once the waiting caller has given up on a handler, the
 * handler's late `meet()` passes straight through instead of parking a
 * pool thread forever.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::dispatch::interrupt::{self, WaitOutcome};
use crate::error::{BusError, BusResult};
use crate::util::lock_unpoisoned;

// ---------------------------------------------------------------------------
// CyclicBarrier
// ---------------------------------------------------------------------------

struct BarrierState {
    /// Parties still missing in the current cycle.
    count: usize,
    /// Incremented on every release; lets sleepers distinguish "my
    /// cycle tripped" from a spurious wakeup.
    resets: u64,
    broken: bool,
}

pub struct CyclicBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    released: Arc<Condvar>,
}

impl CyclicBarrier {
    /**
     * Creates a barrier for `parties` threads. Zero parties is an
     * invalid-argument error.
     */
    pub fn new(parties: usize) -> BusResult<Self> {
        if parties == 0 {
            return Err(BusError::InvalidArgument(
                "barrier must have at least one party".into(),
            ));
        }
        Ok(Self {
            parties,
            state: Mutex::new(BarrierState {
                count: parties,
                resets: 0,
                broken: false,
            }),
            released: Arc::new(Condvar::new()),
        })
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    pub fn broken(&self) -> bool {
        lock_unpoisoned(&self.state).broken
    }

    /**
     * Clears the broken flag and releases all waiting threads with an
     * indeterminate status. Only for recovery paths where no thread
     * can still rely on the barrier's synchronisation.
     */
    pub fn restart(&self) {
        let mut state = lock_unpoisoned(&self.state);
        state.broken = false;
        state.resets += 1;
        state.count = self.parties;
        self.released.notify_all();
    }

    /**
     * Enters the barrier and waits for the remaining parties.
     *
     * # Returns
     * The arrival index: `parties - 1` for the first arrival down to
     * `0` for the one that trips the barrier and releases everyone.
     */
    pub fn barrier(&self) -> BusResult<usize> {
        self.do_barrier(None)
    }

    /// As `barrier`, but gives up (and breaks the barrier) after
    /// `timeout`.
    pub fn attempt_barrier(&self, timeout: Duration) -> BusResult<usize> {
        self.do_barrier(Some(timeout))
    }

    fn do_barrier(&self, timeout: Option<Duration>) -> BusResult<usize> {
        let mut state = lock_unpoisoned(&self.state);

        if state.broken {
            return Err(BusError::BrokenBarrier);
        }
        if interrupt::interrupted() {
            state.broken = true;
            self.released.notify_all();
            return Err(BusError::Interrupted);
        }

        state.count -= 1;
        let index = state.count;

        if index == 0 {
            // tripped: release the cycle
            state.count = self.parties;
            state.resets += 1;
            self.released.notify_all();
            return Ok(0);
        }

        if let Some(t) = timeout {
            if t.is_zero() {
                state.broken = true;
                self.released.notify_all();
                return Err(BusError::TimedOut(0));
            }
        }

        let my_cycle = state.resets;
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let (guard, outcome) = interrupt::wait_on(&self.released, state, remaining);
            state = guard;

            if outcome == WaitOutcome::Interrupted {
                if state.resets == my_cycle {
                    state.broken = true;
                    self.released.notify_all();
                    return Err(BusError::Interrupted);
                }
                /*
                 * Released before the interrupt landed: the cycle
                 * completed normally, so keep the interrupt pending
                 * for the next checkpoint instead of breaking.
                 */
                interrupt::current().interrupt();
            }

            if state.broken {
                return Err(BusError::BrokenBarrier);
            }
            if state.resets != my_cycle {
                return Ok(index);
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    state.broken = true;
                    self.released.notify_all();
                    let waited = timeout.unwrap_or_default();
                    return Err(BusError::TimedOut(waited.as_millis() as u64));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Rendezvous
// ---------------------------------------------------------------------------

/**
 * Two-party barrier with a permanent timed-out latch.
 */
pub struct Rendezvous {
    barrier: CyclicBarrier,
    timed_out: AtomicBool,
}

impl Rendezvous {
    pub fn new() -> Self {
        Self {
            // two parties by construction, so `new` cannot fail
            barrier: CyclicBarrier {
                parties: 2,
                state: Mutex::new(BarrierState {
                    count: 2,
                    resets: 0,
                    broken: false,
                }),
                released: Arc::new(Condvar::new()),
            },
            timed_out: AtomicBool::new(false),
        }
    }

    /**
     * Meets the peer, blocking until it arrives. On a rendezvous that
     * already timed out this returns immediately; a broken barrier is
     * ignored; an interrupt is kept pending for the caller's next
     * checkpoint.
     */
    pub fn meet(&self) {
        if self.timed_out.load(Ordering::SeqCst) {
            return;
        }
        match self.barrier.barrier() {
            Ok(_) | Err(BusError::BrokenBarrier) => {}
            Err(BusError::Interrupted) => interrupt::current().interrupt(),
            Err(_) => {}
        }
    }

    /**
     * Meets the peer with a deadline. Expiry latches the timed-out
     * flag (releasing the late peer forever after) and reports
     * *timed-out* to the caller.
     */
    pub fn meet_with_timeout(&self, timeout: Duration) -> BusResult<()> {
        match self.barrier.attempt_barrier(timeout) {
            Ok(_) => {
                self.barrier.restart();
                Ok(())
            }
            Err(BusError::BrokenBarrier) => Ok(()),
            Err(BusError::TimedOut(ms)) => {
                self.timed_out.store(true, Ordering::SeqCst);
                Err(BusError::TimedOut(ms))
            }
            Err(other) => Err(other),
        }
    }

    pub fn has_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self::new()
    }
}
