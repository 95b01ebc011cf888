/// Output contract of a source-to-source code transform
use crate::config::types::Result;
use crate::traceback::LineMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformOutput {
    /// Code that actually runs
    pub code: String,
    /// Lines prepended before the learner's first line
    pub header_lines: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_map: Option<LineMap>,
}

impl TransformOutput {
    /// Untransformed source
    pub fn passthrough(code: &str) -> Self {
        Self {
            code: code.to_string(),
            header_lines: 0,
            line_map: None,
        }
    }
}

pub trait CodeTransformer: Send + Sync {
    fn transform(&self, source: &str) -> Result<TransformOutput>;
}

/// Runs learner code as written
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl CodeTransformer for Identity {
    fn transform(&self, source: &str) -> Result<TransformOutput> {
        Ok(TransformOutput::passthrough(source))
    }
}

/// Prepends fixed setup lines to learner code
#[derive(Debug, Clone, Default)]
pub struct Prelude {
    header: String,
}

impl Prelude {
    pub fn new(header: &str) -> Self {
        Self {
            header: header.trim_end_matches('\n').to_string(),
        }
    }
}

impl CodeTransformer for Prelude {
    fn transform(&self, source: &str) -> Result<TransformOutput> {
        if self.header.is_empty() {
            return Ok(TransformOutput::passthrough(source));
        }
        let header_lines = self.header.lines().count() as u32;
        Ok(TransformOutput {
            code: format!("{}\n{}", self.header, source),
            header_lines,
            line_map: None,
        })
    }
}
