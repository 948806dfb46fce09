//! Herald — a topic-based publish/subscribe event bus.
//!
//! This is the main crate users should depend on. It re-exports the
//! core engine and the log bridge behind one surface.
//!
//! # Quick start
//!
//! ```
//! use std::sync::Arc;
//! use herald::{BusConfig, Event, EventBus, LocalHandlerRegistry};
//!
//! let registry = Arc::new(LocalHandlerRegistry::new());
//! registry.register(
//!     vec!["org/example/*".to_string()],
//!     None,                       // no predicate
//!     "audit",                    // handler-kind tag
//!     Arc::new(|event: &Event| {
//!         println!("got {}", event.topic());
//!         Ok(())
//!     }),
//! ).unwrap();
//!
//! let bus = EventBus::start(registry, BusConfig::default());
//!
//! // fire-and-forget
//! bus.post_event(Event::with_topic("org/example/CREATED").unwrap()).unwrap();
//! // blocks until all matching handlers ran (or were blacklisted)
//! bus.send_event(Event::with_topic("org/example/UPDATED").unwrap()).unwrap();
//!
//! bus.stop();
//! ```
//!
//! # With a predicate and properties
//!
//! ```
//! use std::sync::Arc;
//! use herald::{BusConfig, Event, EventBus, LocalHandlerRegistry, Properties, Value};
//!
//! let registry = Arc::new(LocalHandlerRegistry::new());
//! registry.register(
//!     vec!["orders/*".to_string()],
//!     Some("(&(state=open)(qty>=10))".to_string()),
//!     "bulk-orders",
//!     Arc::new(|_event: &Event| Ok(())),
//! ).unwrap();
//!
//! let bus = EventBus::start(registry, BusConfig::default());
//! let mut props = Properties::new();
//! props.insert("state".into(), Value::Str("open".into()));
//! props.insert("qty".into(), Value::Int(12));
//! bus.send_event(Event::new("orders/NEW", props).unwrap()).unwrap();
//! bus.stop();
//! ```

// ---------------------------------------------------------------------------
// Re-exports from herald_core — the public surface area
// ---------------------------------------------------------------------------

pub use herald_core::{
    constants, BusConfig, BusError, BusResult, Event, EventAdmin, EventBus, EventHandler, Filter,
    HandlerError, HandlerRegistry, LocalHandlerRegistry, Properties, Registration, RegistrationId,
    Value,
};

/// Lower-level building blocks for embedders that assemble their own
/// bus (custom pools, registries, deliverers).
pub use herald_core::{admin, config, dispatch, error, event, filter, handler, tasks};

// ---------------------------------------------------------------------------
// Log bridge
// ---------------------------------------------------------------------------

pub use herald_log::{install as install_log_bridge, LogBridge, LOG_TOPIC_PREFIX};
