/**
 * Handler-side concerns: who receives events, and who no longer does.
 *
 * - `registry` — the consumed registry contract + local implementation
 * - `blacklist` — ids excluded from delivery
 * - `matcher` — event → ordered handler tasks, with caches
 */

pub mod blacklist;
pub mod matcher;
pub mod registry;

pub use blacklist::Blacklist;
pub use matcher::HandlerTaskFactory;
pub use registry::{
    EventHandler, HandlerRegistry, LocalHandlerRegistry, Registration, RegistrationId,
};
