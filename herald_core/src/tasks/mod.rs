/**
 * Delivery tasks: how matched handlers actually get their events.
 *
 * - `handler_task` — one (registration, event) delivery
 * - `sync_deliver` — caller-blocking frames with timeout supervision
 * - `async_deliver` — per-producer chains on the async pool
 */

pub mod async_deliver;
pub mod handler_task;
pub mod sync_deliver;

pub use async_deliver::AsyncDeliverer;
pub use handler_task::HandlerTask;
pub use sync_deliver::SyncDeliverer;
