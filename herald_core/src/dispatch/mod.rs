/**
 * Dispatch layer: everything that moves tasks onto threads.
 *
 * - `interrupt` — cooperative interruption and interruptible waits
 * - `queue` — the producer/worker hand-off channel
 * - `rendezvous` — cyclic barrier + two-party rendezvous with latch
 * - `pool` — the lazily-grown bounded thread pool
 * - `sync_master` — the thread driving top-level synchronous frames
 */

pub mod interrupt;
pub mod pool;
pub mod queue;
pub mod rendezvous;
pub mod sync_master;

pub use interrupt::InterruptHandle;
pub use pool::{BlockedPolicy, PooledExecutor, Task};
pub use queue::LinkedQueue;
pub use rendezvous::{CyclicBarrier, Rendezvous};
pub use sync_master::SyncMaster;
