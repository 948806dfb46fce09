/*!
 * The bus configuration snapshot.
 *
 * A `BusConfig` is an immutable value applied atomically via
 * `EventAdmin::update`; running workers observe it at their next task
 * boundary. `from_properties` implements the lenient parse rules of
 * the configuration source: an unparseable or below-minimum value is
 * logged at warn level and replaced with the default, never an error.
 */

use std::time::Duration;

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::event::{Properties, Value};

// ---------------------------------------------------------------------------
// Recognised option keys
// ---------------------------------------------------------------------------

pub const PROP_CACHE_SIZE: &str = "cache_size";
pub const PROP_THREAD_POOL_SIZE: &str = "thread_pool_size";
pub const PROP_TIMEOUT: &str = "timeout_ms";
pub const PROP_REQUIRE_TOPIC: &str = "require_topic";
pub const PROP_IGNORE_TIMEOUT: &str = "ignore_timeout_handler_names";
pub const PROP_LOG_LEVEL: &str = "log_level";

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/**
 * All tunables of one bus instance.
 */
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Entry count of each internal cache. Minimum 10.
    pub cache_size: usize,

    /// Sync-pool size; the async pool derives from it. Minimum 2.
    pub thread_pool_size: usize,

    /// Per-handler delivery budget in milliseconds. Values of 100 or
    /// below disable the timeout machinery.
    pub timeout_ms: i64,

    /// When false, handlers registered without any topic mask receive
    /// every event.
    pub require_topic: bool,

    /// Handler-kind tags exempt from timeout supervision.
    #[serde(rename = "ignore_timeout_handler_names")]
    pub ignore_timeout_kinds: Vec<String>,

    /// Ceiling for the bus's own log output.
    #[serde(with = "level_filter_serde")]
    pub log_level: LevelFilter,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            cache_size: 30,
            thread_pool_size: 20,
            timeout_ms: 5000,
            require_topic: true,
            ignore_timeout_kinds: Vec::new(),
            log_level: LevelFilter::Warn,
        }
    }
}

impl BusConfig {
    /**
     * Builds a snapshot from a property map, applying defaults and
     * minimums leniently.
     */
    pub fn from_properties(properties: &Properties) -> Self {
        let defaults = Self::default();
        Self {
            cache_size: int_property(properties, PROP_CACHE_SIZE, 30, 10) as usize,
            thread_pool_size: int_property(properties, PROP_THREAD_POOL_SIZE, 20, 2) as usize,
            timeout_ms: int_property(properties, PROP_TIMEOUT, 5000, i64::MIN),
            require_topic: bool_property(properties, PROP_REQUIRE_TOPIC, true),
            ignore_timeout_kinds: list_property(properties, PROP_IGNORE_TIMEOUT),
            log_level: level_property(properties, PROP_LOG_LEVEL, defaults.log_level),
        }
    }

    /// The per-handler budget, or `None` when timeouts are disabled.
    pub fn effective_timeout(&self) -> Option<Duration> {
        if self.timeout_ms <= 100 {
            None
        } else {
            Some(Duration::from_millis(self.timeout_ms as u64))
        }
    }

    /// Size of the async pool: half the sync pool once that is large
    /// enough to matter, otherwise two workers.
    pub fn async_pool_size(&self) -> usize {
        if self.thread_pool_size > 5 {
            self.thread_pool_size / 2
        } else {
            2
        }
    }
}

// ---------------------------------------------------------------------------
// Lenient property access
// ---------------------------------------------------------------------------

fn int_property(properties: &Properties, key: &str, default: i64, min: i64) -> i64 {
    let Some(value) = properties.get(key) else {
        return default;
    };
    let parsed = match value {
        Value::Int(i) => Some(*i),
        Value::Str(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match parsed {
        Some(number) if number >= min => number,
        Some(_) => {
            log::warn!("value for property '{key}' is too low; using default {default}");
            default
        }
        None => {
            log::warn!("unable to parse property '{key}'; using default {default}");
            default
        }
    }
}

fn bool_property(properties: &Properties, key: &str, default: bool) -> bool {
    match properties.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Str(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        Some(Value::Int(i)) => *i != 0,
        _ => default,
    }
}

/// Comma-separated string (or missing) to a list of trimmed tags.
fn list_property(properties: &Properties, key: &str) -> Vec<String> {
    match properties.get(key) {
        Some(Value::Str(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        Some(_) => {
            log::warn!("value for property '{key}' is not a string list; ignoring");
            Vec::new()
        }
        None => Vec::new(),
    }
}

fn level_property(properties: &Properties, key: &str, default: LevelFilter) -> LevelFilter {
    match properties.get(key) {
        Some(Value::Int(level)) => match level {
            1 => LevelFilter::Error,
            2 => LevelFilter::Warn,
            3 => LevelFilter::Info,
            4 => LevelFilter::Debug,
            5 => LevelFilter::Trace,
            _ => {
                log::warn!("value for property '{key}' is out of range; using default {default}");
                default
            }
        },
        Some(Value::Str(s)) => s.trim().parse().unwrap_or_else(|_| {
            log::warn!("unable to parse property '{key}'; using default {default}");
            default
        }),
        Some(_) => default,
        None => default,
    }
}

// ---------------------------------------------------------------------------
// serde for LevelFilter
// ---------------------------------------------------------------------------

mod level_filter_serde {
    use log::LevelFilter;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(level: &LevelFilter, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&level.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<LevelFilter, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
