/*!
 * Event model: what flows through the bus.
 *
 * - `types` — `Event`, `Value`, `Properties`
 * - `topic` — topic/mask grammar and matching
 * - `constants` — reserved property keys
 */

pub mod constants;
pub mod topic;
pub mod types;

pub use types::{Event, Properties, Value};
