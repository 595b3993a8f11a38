use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Static synonym table; a learned table can replace it behind the same
/// lookup.
static SYNONYMS: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    let entries: &[(&str, &[&str])] = &[
        ("java", &["jvm", "jdk"]),
        ("concurrency", &["multithreading", "parallel"]),
        ("tutorial", &["guide", "howto"]),
        ("javascript", &["js", "ecmascript"]),
        ("js", &["javascript"]),
        ("golang", &["go"]),
        ("error", &["exception", "failure"]),
        ("database", &["db", "datastore"]),
        ("kubernetes", &["k8s"]),
        ("performance", &["optimization", "speed"]),
        ("authentication", &["auth", "login"]),
        ("documentation", &["docs", "reference"]),
    ];
    entries.iter().copied().collect()
});

static YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("valid regex"));
static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d+\.\d+\.\d+\b").expect("valid regex"));
static QUESTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(how|what|why|when|where|who|which|can|does|do|is|are|should)\b|\?")
        .expect("valid regex")
});
static TUTORIAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(tutorial|guide|howto|how to|learn|example)\b").expect("valid regex"));
static DOCS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(docs|documentation|reference|api|spec)\b").expect("valid regex"));
static TROUBLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(error|fix|issue|bug|fails?|failing|broken|exception|crash|troubleshoot)\b")
        .expect("valid regex")
});

const LANGUAGES: &[&str] = &[
    "java", "python", "rust", "golang", "javascript", "typescript", "kotlin", "swift", "ruby",
    "php", "scala", "haskell", "erlang", "elixir", "perl", "lua", "c", "cpp", "csharp",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Entity {
    Language(String),
    Year(String),
    Version(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Question,
    Tutorial,
    Documentation,
    Troubleshooting,
    General,
}

/// Synonyms of the given tokens, excluding the tokens themselves, in
/// first-seen order.
pub fn expand_tokens(tokens: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in tokens {
        if let Some(synonyms) = SYNONYMS.get(token.as_str()) {
            for synonym in *synonyms {
                let synonym = synonym.to_string();
                if !tokens.contains(&synonym) && !out.contains(&synonym) {
                    out.push(synonym);
                }
            }
        }
    }
    out
}

pub fn extract_entities(normalized: &str) -> Vec<Entity> {
    let mut out = Vec::new();
    for token in normalized.split_whitespace() {
        if LANGUAGES.contains(&token) {
            out.push(Entity::Language(token.to_string()));
        }
    }
    for m in YEAR_RE.find_iter(normalized) {
        out.push(Entity::Year(m.as_str().to_string()));
    }
    for m in VERSION_RE.find_iter(normalized) {
        out.push(Entity::Version(m.as_str().to_string()));
    }
    out
}

pub fn classify_intent(normalized: &str) -> QueryIntent {
    if QUESTION_RE.is_match(normalized) {
        QueryIntent::Question
    } else if TROUBLE_RE.is_match(normalized) {
        QueryIntent::Troubleshooting
    } else if TUTORIAL_RE.is_match(normalized) {
        QueryIntent::Tutorial
    } else if DOCS_RE.is_match(normalized) {
        QueryIntent::Documentation
    } else {
        QueryIntent::General
    }
}
