/**
 * Reserved event property keys.
 *
 * These keys have conventional meaning for handlers and bridges; the
 * bus itself only ever writes them from the log bridge side.
 */

/// The topics a handler subscribed to (informational mirror of the
/// registration's mask list).
pub const EVENT_TOPICS: &str = "event.topics";

/// The predicate a handler registered with.
pub const EVENT_FILTER: &str = "event.filter";

/// Wall-clock timestamp of the occurrence described by the event.
pub const TIMESTAMP: &str = "timestamp";

/// Human-readable message.
pub const MESSAGE: &str = "message";

/// Message of an error attached to the event, if any.
pub const EXCEPTION_MESSAGE: &str = "exception.message";
