/*!
 * Predicates over event property maps.
 *
 * The grammar is the standard LDAP search-filter syntax: `&`, `|`, `!`
 * composition over equality, approximate-equality, ordering, substring,
 * and presence items, e.g. `(&(kind=order)(|(qty>=10)(rush=true)))`.
 *
 * - `parser` — nom parser from source text to the `Filter` AST
 * - evaluation lives here, on the AST itself
 *
 * Compiled filters are immutable and shared via `Arc` out of the
 * filter cache; evaluation never allocates except for value coercion.
 */

pub mod parser;

use crate::event::{Properties, Value};

pub use parser::parse;

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

/// Comparison operator of a simple item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    Approx,
    GreaterEq,
    LessEq,
}

/**
 * A compiled predicate.
 *
 * `True` is the constant used when a registration carries no predicate;
 * it matches every event.
 */
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    /// `(attr=*)` — the key is present, whatever its value.
    Present(String),
    /// `(attr=value)`, `(attr~=value)`, `(attr>=value)`, `(attr<=value)`.
    Simple {
        attr: String,
        op: CompareOp,
        value: String,
    },
    /// `(attr=ini*mid*fin)` — wildcard substring match. `initial` and
    /// `terminal` are the anchored ends; `any` must appear in order
    /// in between.
    Substring {
        attr: String,
        initial: Option<String>,
        any: Vec<String>,
        terminal: Option<String>,
    },
    /// Matches everything; used for registrations without a predicate.
    True,
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

impl Filter {
    /**
     * Evaluates the predicate against a property map.
     *
     * Missing keys make the enclosing item false (never an error), so
     * `(!(k=v))` is true when `k` is absent.
     */
    pub fn matches(&self, properties: &Properties) -> bool {
        match self {
            Filter::True => true,
            Filter::And(parts) => parts.iter().all(|f| f.matches(properties)),
            Filter::Or(parts) => parts.iter().any(|f| f.matches(properties)),
            Filter::Not(inner) => !inner.matches(properties),
            Filter::Present(attr) => properties.contains_key(attr),
            Filter::Simple { attr, op, value } => properties
                .get(attr)
                .map(|actual| compare(actual, *op, value))
                .unwrap_or(false),
            Filter::Substring {
                attr,
                initial,
                any,
                terminal,
            } => properties
                .get(attr)
                .map(|actual| {
                    substring_matches(&text_of(actual), initial.as_deref(), any, terminal.as_deref())
                })
                .unwrap_or(false),
        }
    }
}

/// Canonical text form of a value, used for approximate and substring
/// matching.
fn text_of(value: &Value) -> String {
    match value {
        Value::Str(s) | Value::Opaque(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Timestamp(t) => t.to_rfc3339(),
    }
}

/**
 * Typed comparison of an actual property value against the literal
 * from the filter source. The literal is coerced to the type of the
 * actual value; a literal that does not parse as that type makes the
 * item false.
 */
fn compare(actual: &Value, op: CompareOp, literal: &str) -> bool {
    match actual {
        Value::Int(i) => match literal.trim().parse::<i64>() {
            Ok(rhs) => ordered(op, i.cmp(&rhs)),
            Err(_) => false,
        },
        Value::Bool(b) => match literal.trim().parse::<bool>() {
            Ok(rhs) => ordered(op, b.cmp(&rhs)),
            Err(_) => false,
        },
        Value::Timestamp(t) => match chrono::DateTime::parse_from_rfc3339(literal.trim()) {
            Ok(rhs) => ordered(op, t.timestamp_millis().cmp(&rhs.timestamp_millis())),
            Err(_) => false,
        },
        Value::Str(s) | Value::Opaque(s) => match op {
            CompareOp::Approx => approx_eq(s, literal),
            _ => ordered(op, s.as_str().cmp(literal)),
        },
    }
}

fn ordered(op: CompareOp, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        CompareOp::Equal | CompareOp::Approx => ordering == Equal,
        CompareOp::GreaterEq => matches!(ordering, Greater | Equal),
        CompareOp::LessEq => matches!(ordering, Less | Equal),
    }
}

/// Approximate equality: case-insensitive, whitespace ignored.
fn approx_eq(a: &str, b: &str) -> bool {
    let fold = |s: &str| {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect::<String>()
    };
    fold(a) == fold(b)
}

/**
 * Greedy wildcard match. `initial` anchors the start, `terminal` the
 * end, and each element of `any` must occur in order in the remainder.
 */
fn substring_matches(
    text: &str,
    initial: Option<&str>,
    any: &[String],
    terminal: Option<&str>,
) -> bool {
    let mut rest = text;

    if let Some(prefix) = initial {
        match rest.strip_prefix(prefix) {
            Some(r) => rest = r,
            None => return false,
        }
    }
    if let Some(suffix) = terminal {
        match rest.strip_suffix(suffix) {
            Some(r) => rest = r,
            None => return false,
        }
    }
    for part in any {
        match rest.find(part.as_str()) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    true
}
