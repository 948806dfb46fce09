/*!
 * Herald Core — the event bus engine.
 *
 * A topic-based publish/subscribe bus: events carry a hierarchical
 * topic and a property map, handlers register topic masks and optional
 * LDAP-style predicates, and delivery is either asynchronous
 * (fire-and-forget, FIFO per producer) or synchronous (the caller
 * blocks until every matching handler completed or was timed out and
 * blacklisted).
 *
 * End users should usually depend on the `herald` facade crate, which
 * re-exports this API and the log bridge.
 *
 * # Module structure
 *
 * - `event/` — what flows: events, values, topics and masks
 * - `filter/` — LDAP search-filter predicates over properties
 * - `handler/` — registry contract, blacklist, matcher with caches
 * - `dispatch/` — interrupts, hand-off queue, rendezvous, pools,
 *   sync-master
 * - `tasks/` — handler tasks and the sync/async deliverers
 * - `admin` — the post/send/stop/update façade
 * - `bus` — assembly and lifecycle
 * - `config` — the tunables snapshot
 */

mod cache;
mod util;

pub mod admin;
pub mod bus;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod filter;
pub mod handler;
pub mod tasks;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use admin::EventAdmin;
pub use bus::EventBus;
pub use config::BusConfig;
pub use error::{BusError, BusResult, HandlerError};
pub use event::{constants, Event, Properties, Value};
pub use filter::Filter;
pub use handler::{
    EventHandler, HandlerRegistry, LocalHandlerRegistry, Registration, RegistrationId,
};
