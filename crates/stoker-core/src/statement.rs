//! Correlated command units and path normalization.

use regex::Regex;

/// A unit of work sent to the engine: literal command text plus the patterns
/// needed to correlate its eventual output back to this statement.
#[derive(Debug, Clone)]
pub struct Statement {
    /// Command text in the engine's expression syntax.
    pub code: String,
    /// Output matching this resolves the statement successfully.
    pub success_pattern: Regex,
    /// Output matching this rejects the statement with the matched chunk.
    pub failure_pattern: Regex,
    /// Start the engine first if it is not running. When `false` and the
    /// engine is stopped, the statement is silently not run.
    pub start_engine: bool,
    /// Skip the clear-output policy for this statement.
    pub preserve_output: bool,
}

impl Statement {
    /// Build a statement that may start the engine and clears prior output
    /// per the configured policy.
    pub fn new(code: impl Into<String>, success_pattern: Regex, failure_pattern: Regex) -> Self {
        Self {
            code: code.into(),
            success_pattern,
            failure_pattern,
            start_engine: true,
            preserve_output: false,
        }
    }

    /// Only run if the engine is already running.
    pub fn if_running(mut self) -> Self {
        self.start_engine = false;
        self
    }

    /// Keep whatever is already in the output sink.
    pub fn preserving_output(mut self) -> Self {
        self.preserve_output = true;
        self
    }
}

/// Normalize path separators to the engine's canonical forward-slash form.
///
/// Idempotent: a path already in canonical form passes through unchanged, so
/// formatting a command from a backslashed path and from its forward-slash
/// equivalent yields identical command text.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}
