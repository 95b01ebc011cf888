/// Bounded output capture for graded runs
///
/// Worker output arrives as text chunks. Each stream is capped separately
/// and the capture records whether anything was dropped.

use crate::config::loader::OutputSettings;
use crate::config::types::OutputIntegrity;

/// Output limits configuration
#[derive(Debug, Clone)]
pub struct OutputLimits {
    /// Per-stream stdout limit (bytes)
    pub stdout_limit: usize,
    /// Per-stream stderr limit (bytes)
    pub stderr_limit: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        OutputSettings::default().into()
    }
}

impl From<OutputSettings> for OutputLimits {
    fn from(settings: OutputSettings) -> Self {
        OutputLimits {
            stdout_limit: settings.stdout_limit,
            stderr_limit: settings.stderr_limit,
        }
    }
}

/// One capped text stream
#[derive(Debug, Clone)]
struct StreamBuffer {
    text: String,
    limit: usize,
    truncated: bool,
}

impl StreamBuffer {
    fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &str) {
        if self.truncated {
            return;
        }
        let remaining = self.limit.saturating_sub(self.text.len());
        if chunk.len() <= remaining {
            self.text.push_str(chunk);
            return;
        }
        // Cut on a char boundary at or below the limit
        let mut cut = remaining;
        while cut > 0 && !chunk.is_char_boundary(cut) {
            cut -= 1;
        }
        self.text.push_str(&chunk[..cut]);
        self.truncated = true;
    }
}

/// Captured output of one run
#[derive(Debug, Clone, PartialEq)]
pub struct OutputResult {
    pub stdout: String,
    pub stderr: String,
    pub stdout_integrity: OutputIntegrity,
    pub stderr_integrity: OutputIntegrity,
    pub combined_integrity: OutputIntegrity,
}

/// Accumulates streamed stdout/stderr under limits
#[derive(Debug, Clone)]
pub struct BoundedCapture {
    stdout: StreamBuffer,
    stderr: StreamBuffer,
    interrupted: bool,
}

impl BoundedCapture {
    pub fn new(limits: OutputLimits) -> Self {
        Self {
            stdout: StreamBuffer::new(limits.stdout_limit),
            stderr: StreamBuffer::new(limits.stderr_limit),
            interrupted: false,
        }
    }

    pub fn push_stdout(&mut self, chunk: &str) {
        self.stdout.push(chunk);
    }

    pub fn push_stderr(&mut self, chunk: &str) {
        self.stderr.push(chunk);
    }

    /// Run was torn down before completion
    pub fn mark_interrupted(&mut self) {
        self.interrupted = true;
    }

    pub fn stdout_truncated(&self) -> bool {
        self.stdout.truncated
    }

    pub fn stderr_truncated(&self) -> bool {
        self.stderr.truncated
    }

    pub fn finish(self) -> OutputResult {
        let classify = |buffer: &StreamBuffer, interrupted: bool| {
            if buffer.truncated {
                OutputIntegrity::TruncatedByLimit
            } else if interrupted {
                OutputIntegrity::Interrupted
            } else {
                OutputIntegrity::Complete
            }
        };
        let stdout_integrity = classify(&self.stdout, self.interrupted);
        let stderr_integrity = classify(&self.stderr, self.interrupted);

        let combined_integrity = if self.interrupted {
            OutputIntegrity::Interrupted
        } else if self.stdout.truncated || self.stderr.truncated {
            OutputIntegrity::TruncatedByLimit
        } else {
            OutputIntegrity::Complete
        };

        OutputResult {
            stdout: self.stdout.text,
            stderr: self.stderr.text,
            stdout_integrity,
            stderr_integrity,
            combined_integrity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_limits_default() {
        let limits = OutputLimits::default();
        assert_eq!(limits.stdout_limit, 1024 * 1024);
        assert_eq!(limits.stderr_limit, 256 * 1024);
    }

    #[test]
    fn test_capture_within_limits() {
        let mut capture = BoundedCapture::new(OutputLimits::default());
        capture.push_stdout("hello ");
        capture.push_stdout("world\n");
        capture.push_stderr("warn\n");
        let result = capture.finish();
        assert_eq!(result.stdout, "hello world\n");
        assert_eq!(result.stderr, "warn\n");
        assert_eq!(result.combined_integrity, OutputIntegrity::Complete);
    }

    #[test]
    fn test_capture_truncates_on_char_boundary() {
        let mut capture = BoundedCapture::new(OutputLimits {
            stdout_limit: 4,
            stderr_limit: 16,
        });
        // 'é' is two bytes; the cut must not split it
        capture.push_stdout("abcé");
        capture.push_stdout("more");
        assert!(capture.stdout_truncated());
        let result = capture.finish();
        assert_eq!(result.stdout, "abc");
        assert_eq!(result.stdout_integrity, OutputIntegrity::TruncatedByLimit);
        assert_eq!(result.stderr_integrity, OutputIntegrity::Complete);
        assert_eq!(result.combined_integrity, OutputIntegrity::TruncatedByLimit);
    }

    #[test]
    fn test_interrupted_capture() {
        let mut capture = BoundedCapture::new(OutputLimits::default());
        capture.push_stdout("partial");
        capture.mark_interrupted();
        let result = capture.finish();
        assert_eq!(result.stdout, "partial");
        assert_eq!(result.combined_integrity, OutputIntegrity::Interrupted);
    }
}
