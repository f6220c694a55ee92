//! Run-time binding of `{{...}}` argument placeholders
//!
//! `{{key}}` looks `key` up in each source result in turn; `{{step.path}}`
//! reads `path` from the result of step `step` when such a source exists,
//! otherwise the whole dotted path is tried against every source. Sources
//! are searched in the order given, which callers arrange newest first.
//! Unresolved placeholders are left as written.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::catalog::Arguments;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*)\s*\}\}")
        .expect("Valid regex pattern")
});

/// A completed step's result available for binding
#[derive(Debug, Clone, Copy)]
pub struct ResultSource<'a> {
    pub step_id: &'a str,
    pub result: &'a Value,
}

impl<'a> ResultSource<'a> {
    pub fn new(step_id: &'a str, result: &'a Value) -> Self {
        Self { step_id, result }
    }
}

pub fn resolve_arguments(arguments: &Arguments, sources: &[ResultSource<'_>]) -> Arguments {
    arguments
        .iter()
        .map(|(k, v)| (k.clone(), resolve_value(v, sources)))
        .collect()
}

pub fn resolve_value(value: &Value, sources: &[ResultSource<'_>]) -> Value {
    match value {
        Value::String(s) => resolve_string(s, sources),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_value(v, sources)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, sources)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(s: &str, sources: &[ResultSource<'_>]) -> Value {
    // A lone placeholder keeps the bound value's JSON type
    if let Some(caps) = PLACEHOLDER.captures(s.trim()) {
        if caps.get(0).map(|m| m.as_str().len()) == Some(s.trim().len()) {
            return lookup(&caps[1], sources).unwrap_or_else(|| Value::String(s.to_string()));
        }
    }

    let replaced = PLACEHOLDER.replace_all(s, |caps: &Captures| match lookup(&caps[1], sources) {
        Some(Value::String(text)) => text,
        Some(other) => other.to_string(),
        None => caps[0].to_string(),
    });
    Value::String(replaced.into_owned())
}

fn lookup(expr: &str, sources: &[ResultSource<'_>]) -> Option<Value> {
    let segments: Vec<&str> = expr.split('.').collect();

    if let Some((head, rest)) = segments.split_first() {
        if let Some(source) = sources.iter().find(|s| s.step_id == *head) {
            if let Some(found) = walk(source.result, rest) {
                return Some(found.clone());
            }
        }
    }

    sources
        .iter()
        .find_map(|source| walk(source.result, &segments))
        .cloned()
}

fn walk<'v>(value: &'v Value, path: &[&str]) -> Option<&'v Value> {
    path.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(*segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
