//! Structural operations over records
//!
//! Pure functions used by the reconciling model:
//!
//! - [`deep_merge`]: merge a patch into a record, recursing only where both
//!   sides hold a record
//! - [`deep_clone`]: independent copy of a value, recursing into sequences
//! - [`deep_pick`] / [`deep_omit`]: filter a record at every depth
//! - [`changes`]: top-level one-directional diff
//!
//! Sequences are atomic for merge and diff (a changed sequence replaces the
//! old one wholesale) but `deep_clone` copies them element by element.

use super::{Record, Value};

/// Which keys a filter applies to
#[derive(Clone, Copy)]
pub enum Selector<'a> {
    /// Keys named in the list
    Keys(&'a [&'a str]),
    /// Entries for which the predicate holds
    Predicate(&'a dyn Fn(&str, &Value) -> bool),
}

impl<'a> Selector<'a> {
    pub fn matches(&self, key: &str, value: &Value) -> bool {
        match self {
            Selector::Keys(keys) => keys.contains(&key),
            Selector::Predicate(predicate) => predicate(key, value),
        }
    }
}

impl std::fmt::Debug for Selector<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Keys(keys) => f.debug_tuple("Keys").field(keys).finish(),
            Selector::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Merge `source` into `target`
///
/// Where both sides hold a record under the same key the merge recurses,
/// so siblings in `target` survive. Anything else (sequences, timestamps,
/// primitives, or a record replacing a non-record) overwrites.
pub fn deep_merge<'t>(target: &'t mut Record, source: &Record) -> &'t mut Record {
    for (key, value) in source {
        if let (Some(Value::Record(existing)), Value::Record(incoming)) = (target.get_mut(key), value) {
            deep_merge(existing, incoming);
            continue;
        }
        target.insert(key.clone(), deep_clone(value));
    }
    target
}

/// Copy a value with no structure shared with the source
pub fn deep_clone(value: &Value) -> Value {
    match value {
        Value::Record(record) => Value::Record(deep_clone_record(record)),
        Value::Sequence(items) => Value::Sequence(items.iter().map(deep_clone).collect()),
        Value::Null => Value::Null,
        Value::Bool(b) => Value::Bool(*b),
        Value::Number(n) => Value::Number(n.clone()),
        Value::String(s) => Value::String(s.clone()),
        Value::Timestamp(instant) => Value::Timestamp(*instant),
    }
}

/// [`deep_clone`] for a whole record
pub fn deep_clone_record(record: &Record) -> Record {
    record
        .iter()
        .map(|(key, value)| (key.clone(), deep_clone(value)))
        .collect()
}

/// Keep only matching entries, at any depth
///
/// Top-level matches are kept as they are. Every record-valued entry is
/// also searched recursively; a non-empty result is stored under the same
/// key, replacing the top-level match if there was one. Branches with no
/// match are absent, never empty.
pub fn deep_pick(record: &Record, selector: Selector<'_>) -> Record {
    let mut picked: Record = record
        .iter()
        .filter(|(key, value)| selector.matches(key, value))
        .map(|(key, value)| (key.clone(), deep_clone(value)))
        .collect();

    for (key, value) in record {
        if let Value::Record(nested) = value {
            let local = deep_pick(nested, selector);
            if !local.is_empty() {
                picked.insert(key.clone(), Value::Record(local));
            }
        }
    }

    picked
}

/// Drop matching entries, at any depth
///
/// Matching top-level entries are removed, then every remaining record is
/// filtered recursively. A record left empty by the filter is removed from
/// its parent as well.
pub fn deep_omit(record: &Record, selector: Selector<'_>) -> Record {
    let mut omitted = Record::new();

    for (key, value) in record {
        if selector.matches(key, value) {
            continue;
        }
        match value {
            Value::Record(nested) => {
                let local = deep_omit(nested, selector);
                if !local.is_empty() {
                    omitted.insert(key.clone(), Value::Record(local));
                }
            }
            other => {
                omitted.insert(key.clone(), deep_clone(other));
            }
        }
    }

    omitted
}

/// Entries of `b` that are missing from `a` or differ from it
///
/// The diff is top-level only: a difference anywhere inside a nested record
/// reports the whole new subtree under its top-level key. Keys only present
/// in `a` are never reported.
pub fn changes(a: &Record, b: &Record) -> Record {
    b.iter()
        .filter(|(key, value)| a.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), deep_clone(value)))
        .collect()
}
