//! Engine spawn configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for spawning and driving the engine process.
///
/// All fields are immutable for the lifetime of one engine instance;
/// `reset()` terminates the old instance and respawns with the same values.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the engine binary.
    pub binary: PathBuf,
    /// Root of the engine's build tree; also the child's working directory.
    pub root_path: PathBuf,
    /// Target architecture identifier, passed at spawn via `--arch`.
    pub architecture: String,
    /// Regex matched against startup output to detect readiness.
    pub ready_pattern: String,
    /// How long an armed watch (startup banner included) may wait for a
    /// matching chunk before its deadline guard settles it.
    pub response_timeout: Duration,
    /// Clear the output sink before dispatching a command.
    pub clear_output_on_run: bool,
    /// Command line run by `clean()`, executed in `root_path`.
    pub clean_command: Vec<String>,
}

impl EngineConfig {
    /// Default readiness banner: the engine's first interactive prompt.
    pub const DEFAULT_READY_PATTERN: &str = "(?m)^ready>";

    /// Default window an armed watch waits for a matching chunk.
    pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

    /// Build a config with the given spawn identity and default policies.
    pub fn new(
        binary: impl Into<PathBuf>,
        root_path: impl Into<PathBuf>,
        architecture: impl Into<String>,
    ) -> Self {
        Self {
            binary: binary.into(),
            root_path: root_path.into(),
            architecture: architecture.into(),
            ready_pattern: Self::DEFAULT_READY_PATTERN.to_string(),
            response_timeout: Self::DEFAULT_RESPONSE_TIMEOUT,
            clear_output_on_run: true,
            clean_command: vec!["make".to_string(), "clean".to_string()],
        }
    }

    /// Override the readiness pattern.
    pub fn with_ready_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.ready_pattern = pattern.into();
        self
    }

    /// Override the per-watch deadline.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Override the clear-output-before-dispatch policy.
    pub fn with_clear_output_on_run(mut self, clear: bool) -> Self {
        self.clear_output_on_run = clear;
        self
    }

    /// Override the clean subcommand.
    pub fn with_clean_command(mut self, command: Vec<String>) -> Self {
        self.clean_command = command;
        self
    }
}
