//! Error types for the adapter and the output watch.

use std::time::Duration;

/// Errors surfaced by the adapter and watcher.
///
/// Spawn and watch-settlement failures propagate to the immediate caller.
/// Engine stderr traffic is absorbed (logged and mirrored to the sink) and
/// never appears here, because it is not attributable to any single
/// in-flight command.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("failed to spawn engine binary '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine is not running")]
    NotRunning,

    #[error("no engine output matched within {0:?}")]
    WatchTimeout(Duration),

    #[error("engine output matched the failure pattern: {0}")]
    WatchFailure(String),

    #[error("watch was disarmed before settling (displaced or cancelled)")]
    WatchCancelled,

    #[error("clean command `{command}` exited with an error:\n{output}")]
    CleanFailed { command: String, output: String },

    #[error("invalid watch pattern: {0}")]
    BadPattern(#[from] regex::Error),

    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}
