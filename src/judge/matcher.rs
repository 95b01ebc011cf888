//! Output expectations and analyzer-result matchers.
//!
//! An `Expectation` is either a plain string (the output must contain it) or
//! `{ "type": "regex", "expression": "...", "flags": "im" }`. A pattern that
//! fails to compile never matches.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    Regex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternExpectation {
    #[serde(rename = "type")]
    pub kind: PatternKind,
    pub expression: String,
    #[serde(default)]
    pub flags: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expectation {
    Contains(String),
    Pattern(PatternExpectation),
}

impl Expectation {
    pub fn regex(expression: &str, flags: &str) -> Self {
        Expectation::Pattern(PatternExpectation {
            kind: PatternKind::Regex,
            expression: expression.to_string(),
            flags: flags.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub matched: bool,
    /// Capture groups of a regex match, whole match first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
}

impl MatchOutcome {
    fn hit() -> Self {
        Self {
            matched: true,
            groups: None,
        }
    }

    fn miss() -> Self {
        Self::default()
    }
}

/// Match `actual` output against an optional expectation. No expectation matches.
pub fn match_expectation(actual: &str, expected: Option<&Expectation>) -> MatchOutcome {
    match expected {
        None => MatchOutcome::hit(),
        Some(Expectation::Contains(needle)) => {
            if actual.contains(needle.as_str()) {
                MatchOutcome::hit()
            } else {
                MatchOutcome::miss()
            }
        }
        Some(Expectation::Pattern(pattern)) => match_pattern(actual, pattern),
    }
}

fn match_pattern(actual: &str, pattern: &PatternExpectation) -> MatchOutcome {
    let mut builder = RegexBuilder::new(&pattern.expression);
    for flag in pattern.flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            // Global/sticky/unicode flags do not change a single test
            _ => {}
        }
    }
    let re = match builder.build() {
        Ok(re) => re,
        Err(e) => {
            log::warn!("matcher: invalid pattern '{}': {}", pattern.expression, e);
            return MatchOutcome::miss();
        }
    };

    match re.captures(actual) {
        Some(caps) => MatchOutcome {
            matched: true,
            groups: Some(
                caps.iter()
                    .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect(),
            ),
        },
        None => MatchOutcome::miss(),
    }
}

/// Pass criterion applied to a structural analyzer result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultMatcher {
    /// Value at `pointer` is truthy
    Truthy {
        #[serde(default)]
        pointer: String,
    },
    /// Value at `pointer` equals `value`
    Equals {
        #[serde(default)]
        pointer: String,
        value: Value,
    },
    /// String at `pointer` contains `text`, or array at `pointer` holds it
    Contains {
        #[serde(default)]
        pointer: String,
        text: String,
    },
}

impl Default for ResultMatcher {
    fn default() -> Self {
        ResultMatcher::Truthy {
            pointer: String::new(),
        }
    }
}

impl ResultMatcher {
    pub fn evaluate(&self, result: &Value) -> bool {
        match self {
            ResultMatcher::Truthy { pointer } => result.pointer(pointer).map(is_truthy).unwrap_or(false),
            ResultMatcher::Equals { pointer, value } => result.pointer(pointer) == Some(value),
            ResultMatcher::Contains { pointer, text } => match result.pointer(pointer) {
                Some(Value::String(s)) => s.contains(text.as_str()),
                Some(Value::Array(items)) => items.iter().any(|item| item.as_str() == Some(text.as_str())),
                _ => false,
            },
        }
    }
}

/// Null, false, zero and the empty string are falsy; everything else holds
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
