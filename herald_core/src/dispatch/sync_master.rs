/*!
 * The sync-master thread.
 *
 * Top-level synchronous sends are not driven on the producer's own
 * thread: the frame is handed to this dedicated thread and the
 * producer blocks on a completion signal. That keeps every top-level
 * sync frame on a bus-owned, interruptible thread and makes
 * synchronous sends globally FIFO by construction. Nested sends (from
 * inside a handler) bypass the master and run inline on whatever
 * thread the handler occupies.
 *
 * ```text
 *  ┌──────────────┐      unbounded channel      ┌────────────────────┐
 *  │ producer     │ ───── MasterJob ──────────► │ sync-master thread │
 *  │ (any thread) │ ◄──── DoneSignal ────────── │ (single)           │
 *  └──────────────┘                             └────────────────────┘
 * ```
 */

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::error::{BusError, BusResult};
use crate::util::lock_unpoisoned;

/// A synchronous delivery frame plus its completion signal.
struct MasterJob {
    run: Box<dyn FnOnce() -> BusResult<()> + Send>,
    done: Arc<DoneSignal>,
}

// ---------------------------------------------------------------------------
// DoneSignal
// ---------------------------------------------------------------------------

/**
 * Blocks the producer until the master has finished its frame and
 * carries the frame's result back.
 */
struct DoneSignal {
    result: Mutex<Option<BusResult<()>>>,
    cond: Condvar,
}

impl DoneSignal {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    fn complete(&self, result: BusResult<()>) {
        *lock_unpoisoned(&self.result) = Some(result);
        self.cond.notify_all();
    }

    fn wait(&self) -> BusResult<()> {
        let mut result = lock_unpoisoned(&self.result);
        loop {
            if let Some(outcome) = result.take() {
                return outcome;
            }
            result = match self.cond.wait(result) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

// ---------------------------------------------------------------------------
// SyncMaster
// ---------------------------------------------------------------------------

pub struct SyncMaster {
    sender: Mutex<Option<Sender<MasterJob>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SyncMaster {
    /**
     * Spawns the master thread. It runs until `stop()` disconnects the
     * channel; jobs already queued at that point are still completed.
     */
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<MasterJob>();

        let handle = thread::Builder::new()
            .name("herald-sync-master".into())
            .spawn(move || Self::run_loop(&receiver))
            .ok();

        if handle.is_none() {
            log::warn!("failed to spawn the sync-master thread; synchronous sends will fail");
        }

        Self {
            sender: Mutex::new(handle.as_ref().map(|_| sender)),
            thread: Mutex::new(handle),
        }
    }

    fn run_loop(receiver: &Receiver<MasterJob>) {
        /*
         * The iterator ends when all senders are dropped and the
         * channel is empty, which is exactly the stop() contract.
         */
        for job in receiver.iter() {
            let outcome = catch_unwind(AssertUnwindSafe(job.run));
            match outcome {
                Ok(result) => job.done.complete(result),
                Err(_) => {
                    log::warn!("a synchronous delivery frame panicked");
                    job.done.complete(Err(BusError::IllegalState(
                        "synchronous delivery frame panicked".into(),
                    )));
                }
            }
        }
    }

    /**
     * Runs `frame` on the master thread, blocking until it completes,
     * and returns the frame's result. Fails with *illegal-state* once
     * the master has been stopped.
     */
    pub fn run_sync(&self, frame: Box<dyn FnOnce() -> BusResult<()> + Send>) -> BusResult<()> {
        let sender = lock_unpoisoned(&self.sender).clone();
        let Some(sender) = sender else {
            return Err(BusError::stopped());
        };

        let done = Arc::new(DoneSignal::new());
        let job = MasterJob {
            run: frame,
            done: Arc::clone(&done),
        };
        if sender.send(job).is_err() {
            return Err(BusError::stopped());
        }
        done.wait()
    }

    /**
     * Disconnects and joins the master. In-flight and already-queued
     * frames complete first; later `run_sync` calls fail with
     * *illegal-state*. Idempotent.
     */
    pub fn stop(&self) {
        lock_unpoisoned(&self.sender).take();
        if let Some(handle) = lock_unpoisoned(&self.thread).take() {
            let _ = handle.join();
        }
    }
}

impl Default for SyncMaster {
    fn default() -> Self {
        Self::new()
    }
}
