//! Lexical parameter extraction
//!
//! Best-effort pattern matching over the request text. Nothing here can
//! fail: a pattern that does not match simply contributes no parameter.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use super::IntentKind;

const STOPWORDS: &[&str] = &[
    "a", "all", "an", "and", "any", "archive", "by", "clean", "content", "each", "every", "for",
    "from", "in", "is", "my", "of", "old", "or", "our", "project", "that", "the", "their", "this",
    "to", "unused", "up", "user", "users", "who", "with",
];

static QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["“]([^"”]+)["”]"#).expect("Valid regex pattern"));

static PROJECT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)project\s+["“]([^"”]+)["”]"#,
        r#"(?i)["“]([^"”]+)["”]\s+project"#,
        r"(?i)\b(?:in|from)\s+(?:the\s+)?([\w\-]+)\s+project",
        r"(?i)\b([\w\-]+)\s+project",
        r"(?i)\bproject\s+([\w\-]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Valid regex pattern"))
    .collect()
});

static USER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(\w+(?:\.\w+)?)'s\s+content",
        r"(?i)\buser\s+(\w+(?:\.\w+)?)",
        r"(?i)\boffboard\s+(\w+(?:\.\w+)?)",
        r"(?i)\bmigrate\s+(\w+(?:\.\w+)?)",
        r"(?i)\bby\s+(\w+(?:\.\w+)?)",
        r"(?i)\b(\w+(?:\.\w+)?)\s+(?:is\s+)?leav(?:es|ing)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Valid regex pattern"))
    .collect()
});

static TARGET_USER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bto\s+(\w+(?:\.\w+)?)").expect("Valid regex pattern"));

static DAYS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,5})\s*days?\b").expect("Valid regex pattern"));

fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word.to_lowercase().as_str())
}

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns.iter().find_map(|pattern| {
        pattern
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .find(|candidate| !candidate.is_empty() && !is_stopword(candidate))
    })
}

pub fn project_name(text: &str) -> Option<String> {
    first_capture(&PROJECT_PATTERNS, text)
}

pub fn username(text: &str) -> Option<String> {
    first_capture(&USER_PATTERNS, text)
}

pub fn target_user(text: &str) -> Option<String> {
    TARGET_USER
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .find(|candidate| !is_stopword(candidate))
}

pub fn age_threshold_days(text: &str) -> Option<u32> {
    DAYS.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub fn quoted(text: &str) -> Option<String> {
    QUOTED
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Extract every parameter relevant to `kind` from `text`.
/// Custom intents never carry parameters.
pub fn extract_parameters(kind: IntentKind, text: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    let lower = text.to_lowercase();

    match kind {
        IntentKind::Cleanup => {
            if let Some(project) = project_name(text) {
                params.insert("project".to_string(), project);
            }
            if let Some(days) = age_threshold_days(text) {
                params.insert("age_threshold".to_string(), days.to_string());
            }
            if lower.contains("duplicate") {
                params.insert("include_duplicates".to_string(), "true".to_string());
            }
        }
        IntentKind::Migration => {
            if let Some(user) = username(text) {
                params.insert("user".to_string(), user);
            }
            if let Some(target) = target_user(text) {
                if params.get("user") != Some(&target) {
                    params.insert("target_user".to_string(), target);
                }
            }
        }
        IntentKind::Audit => {
            if let Some(project) = project_name(text) {
                params.insert("project".to_string(), project);
            }
            if lower.contains("sensitive") {
                params.insert("scope".to_string(), "sensitive".to_string());
            }
            if lower.contains("compliance") {
                params.insert("compliance".to_string(), "true".to_string());
            }
        }
        IntentKind::Custom => return params,
    }

    if let Some(name) = quoted(text) {
        params.insert("name".to_string(), name);
    }
    params
}
