/*!
 * The hand-off channel between task producers and pool workers.
 *
 * An unbounded FIFO queue of single-use tasks with blocking,
 * interruptible consumption. Producers never block beyond the brief
 * lock acquisition.
 *
 * A wake-count (`waiting_for_take`) guards the consumer condition:
 * `put` only notifies when a consumer is actually parked, and a
 * consumer that leaves the wait via interrupt re-issues one wake so a
 * notification it may have consumed is not lost.
 *
 * Notifications are issued under the queue mutex, so a parked consumer
 * can never miss a `put`. Interrupts are delivered through the sliced
 * wait in `interrupt`, which bounds their latency instead.
 */

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::dispatch::interrupt::{self, WaitOutcome};
use crate::error::{BusError, BusResult};
use crate::util::lock_unpoisoned;

struct QueueState<T> {
    items: VecDeque<T>,
    /// Number of consumers parked in `take`/`poll`.
    waiting_for_take: usize,
}

/**
 * Unbounded FIFO hand-off queue.
 */
pub struct LinkedQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Arc<Condvar>,
}

impl<T: Send> LinkedQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                waiting_for_take: 0,
            }),
            available: Arc::new(Condvar::new()),
        }
    }

    /**
     * Appends an item and wakes at most one parked consumer.
     *
     * Fails with *interrupted* (without inserting) if the calling
     * thread has a pending interrupt.
     */
    pub fn put(&self, item: T) -> BusResult<()> {
        if interrupt::interrupted() {
            return Err(BusError::Interrupted);
        }
        let mut state = lock_unpoisoned(&self.state);
        state.items.push_back(item);
        if state.waiting_for_take > 0 {
            self.available.notify_one();
        }
        Ok(())
    }

    /**
     * Timed insert. The queue is unbounded, so this is `put` plus a
     * `true` result; the deadline is reserved for bounded variants.
     */
    pub fn offer(&self, item: T, _timeout: Duration) -> BusResult<bool> {
        self.put(item)?;
        Ok(true)
    }

    /**
     * Hands the item directly to a parked consumer, or gives it back.
     *
     * This is the executor's "is a worker already waiting?" probe: it
     * inserts (and wakes a consumer) only when someone is parked in
     * `take`/`poll`, and otherwise returns the item unchanged so the
     * caller can decide to grow the pool or invoke its blocked policy.
     */
    pub fn offer_to_waiter(&self, item: T) -> Result<(), T> {
        let mut state = lock_unpoisoned(&self.state);
        if state.waiting_for_take > 0 {
            state.items.push_back(item);
            self.available.notify_one();
            Ok(())
        } else {
            Err(item)
        }
    }

    /**
     * Removes and returns the head, blocking until an item arrives.
     *
     * Only values previously inserted are ever returned. On interrupt
     * the waiting slot is released, one peer is woken, and the call
     * fails with *interrupted*.
     */
    pub fn take(&self) -> BusResult<T> {
        if interrupt::interrupted() {
            return Err(BusError::Interrupted);
        }
        let mut state = lock_unpoisoned(&self.state);
        loop {
            if let Some(item) = state.items.pop_front() {
                return Ok(item);
            }
            state.waiting_for_take += 1;
            let (guard, outcome) = interrupt::wait_on(&self.available, state, None);
            state = guard;
            state.waiting_for_take -= 1;
            if outcome == WaitOutcome::Interrupted {
                // hand a possibly-consumed wake to a peer
                self.available.notify_one();
                return Err(BusError::Interrupted);
            }
        }
    }

    /**
     * As `take`, but gives up after `timeout` and returns `None`.
     */
    pub fn poll(&self, timeout: Duration) -> BusResult<Option<T>> {
        if interrupt::interrupted() {
            return Err(BusError::Interrupted);
        }
        let deadline = Instant::now() + timeout;
        let mut state = lock_unpoisoned(&self.state);
        loop {
            if let Some(item) = state.items.pop_front() {
                return Ok(Some(item));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            state.waiting_for_take += 1;
            let (guard, outcome) =
                interrupt::wait_on(&self.available, state, Some(deadline - now));
            state = guard;
            state.waiting_for_take -= 1;
            match outcome {
                WaitOutcome::Interrupted => {
                    self.available.notify_one();
                    return Err(BusError::Interrupted);
                }
                WaitOutcome::TimedOut | WaitOutcome::Notified => {}
            }
        }
    }

    /// Whether the queue currently holds no items. Queued tasks are
    /// single-use closures, so there is no non-destructive peek beyond
    /// this.
    pub fn is_empty(&self) -> bool {
        lock_unpoisoned(&self.state).items.is_empty()
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.state).items.len()
    }
}

impl<T: Send> Default for LinkedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = LinkedQueue::new();
        for i in 0..4 {
            queue.put(i).expect("put");
        }
        // unbounded: offer always accepts
        assert!(queue.offer(4, Duration::ZERO).expect("offer"));
        for i in 0..5 {
            assert_eq!(queue.take().expect("take"), i);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_poll_times_out_when_empty() {
        let queue: LinkedQueue<u32> = LinkedQueue::new();
        let started = Instant::now();
        let polled = queue.poll(Duration::from_millis(120)).expect("poll");
        assert_eq!(polled, None);
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[test]
    fn test_take_wakes_on_put() {
        let queue = Arc::new(LinkedQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take().expect("take"))
        };
        thread::sleep(Duration::from_millis(50));
        queue.put(42u32).expect("put");
        assert_eq!(consumer.join().expect("join"), 42);
    }

    #[test]
    fn test_offer_to_waiter_requires_parked_consumer() {
        let queue = Arc::new(LinkedQueue::new());
        // nobody waiting: the item comes straight back
        assert_eq!(queue.offer_to_waiter(7u32), Err(7));

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take().expect("take"))
        };
        // wait until the consumer has actually parked
        let mut handed_over = false;
        for _ in 0..100 {
            thread::sleep(Duration::from_millis(10));
            if queue.offer_to_waiter(9u32).is_ok() {
                handed_over = true;
                break;
            }
        }
        assert!(handed_over, "consumer never parked");
        assert_eq!(consumer.join().expect("join"), 9);
    }

    /**
     * Interrupting a blocked consumer releases it with *interrupted*
     * and leaves the queue usable.
     */
    #[test]
    fn test_interrupt_releases_blocked_take() {
        let queue: Arc<LinkedQueue<u32>> = Arc::new(LinkedQueue::new());
        let (handle_tx, handle_rx) = crossbeam_channel::bounded(1);
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                handle_tx.send(interrupt::current()).expect("send");
                queue.take()
            })
        };
        let handle = handle_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("handle");
        thread::sleep(Duration::from_millis(50));
        handle.interrupt();
        let result = consumer.join().expect("join");
        assert!(matches!(result, Err(BusError::Interrupted)));

        queue.put(1).expect("put still works");
        assert_eq!(queue.take().expect("take"), 1);
    }

    /**
     * Conservation: across concurrent producers and consumers, exactly
     * the items put are drained, no more, no fewer.
     */
    #[test]
    fn test_conservation_across_threads() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 250;

        let queue = Arc::new(LinkedQueue::new());
        let drained = Arc::new(AtomicUsize::new(0));
        let sum = Arc::new(AtomicUsize::new(0));

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let drained = Arc::clone(&drained);
                let sum = Arc::clone(&sum);
                thread::spawn(move || loop {
                    match queue.poll(Duration::from_millis(500)).expect("poll") {
                        Some(value) => {
                            sum.fetch_add(value, Ordering::SeqCst);
                            drained.fetch_add(1, Ordering::SeqCst);
                        }
                        None => break,
                    }
                })
            })
            .collect();

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        queue.put(p * PER_PRODUCER + i).expect("put");
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().expect("producer");
        }
        for consumer in consumers {
            consumer.join().expect("consumer");
        }

        let total = PRODUCERS * PER_PRODUCER;
        assert_eq!(drained.load(Ordering::SeqCst), total);
        let expected_sum: usize = (0..total).sum();
        assert_eq!(sum.load(Ordering::SeqCst), expected_sum);
    }
}
