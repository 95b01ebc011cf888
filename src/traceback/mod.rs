//! Traceback line mapping.
//!
//! Learner code is usually transformed before it runs: a header is prepended
//! and extra lines may be interleaved. Error locations reported by the
//! interpreter therefore refer to the transformed text. The mapper rewrites
//! every `File "<name>", line N[, column C]` marker so it names the learner's
//! file and line instead:
//!
//! - an explicit `LineMap` entry for `N` wins outright;
//! - otherwise `N - header_offset`, clamped to at least 1.
//!
//! Columns and all other text pass through verbatim.

pub mod transform;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use transform::{CodeTransformer, Identity, TransformOutput};

/// Display name used when none is configured
pub const DEFAULT_DISPLAY_NAME: &str = "/main.py";

static FRAME_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"File "([^"]+)", line (\d+)(?:, column (\d+))?"#).expect("valid frame pattern")
});

static LINE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"line (\d+)").expect("valid line pattern"));

/// Transformed line number -> original line number
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineMap(BTreeMap<u32, u32>);

impl LineMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, transformed: u32, original: u32) {
        self.0.insert(transformed, original);
    }

    pub fn get(&self, transformed: u32) -> Option<u32> {
        self.0.get(&transformed).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(u32, u32)> for LineMap {
    fn from_iter<I: IntoIterator<Item = (u32, u32)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone)]
pub struct TracebackMapper {
    header_offset: u32,
    line_map: Option<LineMap>,
    display_name: String,
}

impl TracebackMapper {
    pub fn new(header_offset: u32) -> Self {
        Self {
            header_offset,
            line_map: None,
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
        }
    }

    /// Mapper for the output of a code transform
    pub fn for_transform(output: &TransformOutput) -> Self {
        let mapper = Self::new(output.header_lines);
        match &output.line_map {
            Some(map) if !map.is_empty() => mapper.with_line_map(map.clone()),
            _ => mapper,
        }
    }

    pub fn with_line_map(mut self, line_map: LineMap) -> Self {
        self.line_map = Some(line_map);
        self
    }

    pub fn with_display_name(mut self, name: &str) -> Self {
        self.display_name = name.to_string();
        self
    }

    /// Learner-facing line for a transformed line number
    pub fn map_line(&self, transformed: u32) -> u32 {
        if let Some(original) = self.line_map.as_ref().and_then(|m| m.get(transformed)) {
            return original.max(1);
        }
        transformed.saturating_sub(self.header_offset).max(1)
    }

    /// Rewrite every frame marker in `raw`
    pub fn map(&self, raw: &str) -> String {
        if raw.is_empty() {
            return String::new();
        }
        FRAME_MARKER.replace_all(raw, |caps: &Captures| {
            // Digits overflowing u32 are left untouched
            let Some(line) = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok()) else {
                return caps[0].to_string();
            };
            let mapped = self.map_line(line);
            match caps.get(3) {
                Some(column) => format!(
                    "File \"{}\", line {}, column {}",
                    self.display_name,
                    mapped,
                    column.as_str()
                ),
                None => format!("File \"{}\", line {}", self.display_name, mapped),
            }
        })
        .into_owned()
    }
}

/// Map with a header offset only, naming the default file
pub fn map_traceback(raw: &str, header_offset: u32) -> String {
    TracebackMapper::new(header_offset).map(raw)
}

/// Excerpt of the learner's code around the first line a mapped traceback
/// mentions: two lines either side, the error line marked with `->`.
pub fn source_context(mapped: &str, user_code: &str) -> Option<String> {
    let err_line: usize = LINE_NUMBER.captures(mapped)?.get(1)?.as_str().parse().ok()?;
    let err_line = err_line.max(1);

    let lines: Vec<&str> = user_code.split('\n').collect();
    let start = err_line.saturating_sub(3);
    let end = lines.len().min(err_line + 2);
    if start >= end {
        return None;
    }

    let excerpt: Vec<String> = (start..end)
        .map(|i| {
            let prefix = if i + 1 == err_line { "-> " } else { "   " };
            format!("{}{:>3}: {}", prefix, i + 1, lines[i])
        })
        .collect();
    Some(excerpt.join("\n"))
}
