//! Topic and topic-mask grammar.
//!
//! A topic is a slash-separated hierarchical name, e.g.
//! `org/example/Thing/CREATED`. Segments are `[A-Za-z0-9_]+`.
//!
//! A mask is either a literal topic, a topic with a trailing `/*`
//! wildcard segment covering the whole subtree (including the prefix
//! itself), or the bare `*` matching everything.

use crate::error::{BusError, BusResult};

/// The mask that matches every topic.
pub const MATCH_ALL: &str = "*";

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validates a concrete event topic (no wildcards allowed).
pub fn validate_topic(topic: &str) -> BusResult<()> {
    if topic.is_empty() {
        return Err(BusError::InvalidArgument("topic must not be empty".into()));
    }
    if topic.split('/').all(valid_segment) {
        Ok(())
    } else {
        Err(BusError::InvalidArgument(format!(
            "malformed topic: {topic:?}"
        )))
    }
}

/// Validates a subscription mask. The wildcard is only legal as the
/// whole trailing segment (`a/b/*`) or as the bare `*`.
pub fn validate_mask(mask: &str) -> BusResult<()> {
    if mask == MATCH_ALL {
        return Ok(());
    }
    if let Some(prefix) = mask.strip_suffix("/*") {
        return validate_topic(prefix);
    }
    validate_topic(mask).map_err(|_| {
        BusError::InvalidArgument(format!("malformed topic mask: {mask:?}"))
    })
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Whether `mask` covers `topic`.
///
/// `a/b/c` matches only the literal `a/b/c`; `a/b/*` matches `a/b` and
/// anything below it; `*` matches all.
pub fn mask_matches(mask: &str, topic: &str) -> bool {
    if mask == MATCH_ALL {
        return true;
    }
    match mask.strip_suffix("/*") {
        Some(prefix) => {
            topic == prefix
                || (topic.len() > prefix.len()
                    && topic.starts_with(prefix)
                    && topic.as_bytes()[prefix.len()] == b'/')
        }
        None => mask == topic,
    }
}

/// Expands a concrete topic into the ordered disjunction of masks that
/// could select it. For `a/b/c` this is:
///
/// `a/b/c`, `a/b/c/*`, `a/b/*`, `a/*`, `*`
///
/// A registration matches the topic iff its mask list intersects this
/// set. The result is what the per-topic cache stores.
pub fn expand(topic: &str) -> Vec<String> {
    let mut masks = Vec::new();
    masks.push(topic.to_string());
    let mut prefix = topic;
    loop {
        masks.push(format!("{prefix}/*"));
        match prefix.rfind('/') {
            Some(idx) => prefix = &prefix[..idx],
            None => break,
        }
    }
    masks.push(MATCH_ALL.to_string());
    masks
}
