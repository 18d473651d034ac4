//! The process adapter: engine lifecycle and the command surface.
//!
//! Owns at most one engine subprocess at a time and serializes every
//! outbound command. Correlated commands arm the output watch before their
//! bytes reach the engine, so no response chunk can race past its watch.
//!
//! State machine:
//!
//! ```text
//! NotStarted -> Starting -> Running
//! Running    -> Stopped              (stop / kill)
//! Stopped    -> Starting             (reset, or any started-requiring call)
//! ```
//!
//! A call arriving while a transition is in flight awaits it rather than
//! beginning a second one: the inner lock is held across the whole
//! spawn-and-ready sequence, so exactly one spawn happens per transition.

use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::engine::{self, EngineProcess};
use crate::error::AdapterError;
use crate::location::SourceLocation;
use crate::sink::{DiagnosticsSink, OutputSink};
use crate::statement::{Statement, normalize_path};
use crate::watcher::OutputWatcher;

/// Lifecycle state of the adapter's engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    NotStarted,
    Starting,
    Running,
    Stopped,
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AdapterState::NotStarted => "not-started",
            AdapterState::Starting => "starting",
            AdapterState::Running => "running",
            AdapterState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

struct Inner {
    engine: Option<EngineProcess>,
}

/// Drives the engine process and exposes the async command surface.
pub struct EngineAdapter {
    config: EngineConfig,
    ready: Regex,
    watcher: Arc<OutputWatcher>,
    sink: Arc<dyn OutputSink>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    /// Serializes lifecycle transitions and command writes.
    inner: Mutex<Inner>,
    /// Observable state; readable without touching the inner lock.
    state: std::sync::Mutex<AdapterState>,
}

impl std::fmt::Debug for EngineAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineAdapter")
            .field("state", &self.state())
            .field("binary", &self.config.binary)
            .finish()
    }
}

impl EngineAdapter {
    /// Build an adapter. Fails only if the configured readiness pattern does
    /// not compile.
    pub fn new(
        config: EngineConfig,
        sink: Arc<dyn OutputSink>,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Result<Self, AdapterError> {
        let ready = Regex::new(&config.ready_pattern)?;
        let watcher = Arc::new(OutputWatcher::new(Arc::clone(&sink)));

        Ok(Self {
            config,
            ready,
            watcher,
            sink,
            diagnostics,
            inner: Mutex::new(Inner { engine: None }),
            state: std::sync::Mutex::new(AdapterState::NotStarted),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AdapterState {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// OS pid of the live engine, if one is running.
    pub async fn engine_pid(&self) -> Option<u32> {
        self.inner.lock().await.engine.as_ref().and_then(EngineProcess::id)
    }

    /// Start the engine if it is not already running.
    ///
    /// Returns `Ok(true)` when this call spawned the engine, `Ok(false)`
    /// when it was already running. Concurrent callers await the in-flight
    /// transition instead of spawning a second process.
    pub async fn start(&self) -> Result<bool, AdapterError> {
        let mut inner = self.inner.lock().await;
        self.start_locked(&mut inner).await
    }

    /// Kill the current engine unconditionally and start a fresh one.
    ///
    /// The old process is fully terminated (no longer accepting writes)
    /// before the new one is spawned. Any outstanding watch is cancelled: a
    /// watch must not survive across engine instances.
    pub async fn reset(&self) -> Result<bool, AdapterError> {
        let mut inner = self.inner.lock().await;
        info!("resetting engine");

        if let Some(mut old) = inner.engine.take() {
            old.kill().await;
        }
        self.watcher.clear_watch();
        self.clear_output_if_needed();
        self.set_state(AdapterState::NotStarted);

        self.start_locked(&mut inner).await
    }

    /// Terminate the engine. No-op when it is not running.
    ///
    /// Does not settle any outstanding watch; a watch armed against the
    /// killed process is left to its deadline guard.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        let Some(mut old) = inner.engine.take() else {
            return;
        };

        self.clear_output_if_needed();
        self.sink.write("[engine killed]\n");
        old.kill().await;
        self.set_state(AdapterState::Stopped);
        info!("engine stopped");
    }

    /// Run the configured clean subcommand and discard engine build state.
    ///
    /// Blocks the adapter's command path until the subcommand returns, then
    /// writes a bracketed report to the sink. The adapter always ends in
    /// `NotStarted`: clean invalidates any loaded build state, so the engine
    /// is considered gone even when the subcommand itself failed.
    pub async fn clean(&self) -> Result<String, AdapterError> {
        let mut inner = self.inner.lock().await;
        info!(command = ?self.config.clean_command, "running clean subcommand");

        if let Some(mut old) = inner.engine.take() {
            // The old instance's loaded state is about to be invalidated; it
            // must not outlive the clean under the owned-handle model.
            old.kill().await;
        }
        self.watcher.clear_watch();
        self.clear_output_if_needed();

        let result = engine::run_clean(&self.config).await;
        let text = match &result {
            Ok(text) => text.clone(),
            Err(AdapterError::CleanFailed { output, .. }) => output.clone(),
            Err(_) => String::new(),
        };

        self.sink
            .write(&format!("[clean: {}]\n", self.config.clean_command.join(" ")));
        self.sink.write("---------------------\n");
        self.sink.write(&text);
        self.sink.write("---------------------\n");
        self.sink.write("[engine build state discarded]\n");

        self.set_state(AdapterState::NotStarted);
        result
    }

    /// Send raw command text, starting the engine first if necessary.
    pub async fn run(&self, code: &str) -> Result<(), AdapterError> {
        let mut inner = self.inner.lock().await;
        self.clear_output_if_needed();
        self.diagnostics.clear();
        self.start_locked(&mut inner).await?;
        self.write_locked(&mut inner, code).await
    }

    /// Send raw command text only if the engine is already running.
    ///
    /// A stopped engine makes this a silent no-op; output and diagnostics
    /// are still cleared per policy, matching the best-effort contract.
    pub async fn run_if_started(&self, code: &str) -> Result<(), AdapterError> {
        let mut inner = self.inner.lock().await;
        self.clear_output_if_needed();
        self.diagnostics.clear();
        if inner.engine.is_none() {
            return Ok(());
        }
        self.write_locked(&mut inner, code).await
    }

    /// The correlated request/response primitive.
    ///
    /// Arms the watch with the statement's patterns, sends the code, and
    /// waits for the watch to settle: `Ok(true)` on a success match,
    /// [`AdapterError::WatchFailure`] on a failure match,
    /// [`AdapterError::WatchTimeout`] when neither pattern matches within
    /// the deadline. Returns `Ok(false)` without sending anything when the
    /// statement does not allow starting the engine and it is not running.
    ///
    /// The adapter lock is released while waiting, so a second statement
    /// issued before this one settles will displace its watch; callers with
    /// dependent statements must await each result in turn.
    pub async fn run_statement(&self, statement: Statement) -> Result<bool, AdapterError> {
        let mut inner = self.inner.lock().await;

        if !statement.start_engine && self.state() != AdapterState::Running {
            return Ok(false);
        }
        if !statement.preserve_output {
            self.clear_output_if_needed();
        }
        self.start_locked(&mut inner).await?;

        let watch = self.watcher.arm_watch(
            Some(statement.success_pattern),
            Some(statement.failure_pattern),
        );
        self.spawn_deadline_guard(watch.generation, watch.cancel.clone());
        self.write_locked(&mut inner, &statement.code).await?;
        drop(inner);

        watch.wait().await.map(|()| true)
    }

    /// Load all known definitions below a path.
    pub async fn load_all_known(&self, path: &str) -> Result<(), AdapterError> {
        self.diagnostics.clear();
        let code = format!("loadAll(\"{}\");", normalize_path(path));
        let mut inner = self.inner.lock().await;
        self.start_locked(&mut inner).await?;
        self.write_locked(&mut inner, &code).await
    }

    /// Compile everything below a workspace root.
    pub async fn compile_workspace(&self, root: &str) -> Result<(), AdapterError> {
        self.compile_workspaces(&[root]).await
    }

    /// Compile everything below each of several workspace roots in one
    /// engine round trip.
    pub async fn compile_workspaces(&self, roots: &[&str]) -> Result<(), AdapterError> {
        let mut body = String::new();
        for root in roots {
            let mut root = normalize_path(root);
            if !root.ends_with('/') {
                root.push('/');
            }
            body.push_str(&format!("compileAllBelow(CompileAllEnv(\"{root}\"));"));
        }
        let code = format!("{{ use runtime.util; {body} }}");
        self.run(&code).await
    }

    /// Compile a single file.
    pub async fn compile_file(&self, path: &str) -> Result<(), AdapterError> {
        let mut inner = self.inner.lock().await;
        self.clear_output_if_needed();
        self.diagnostics.clear();
        self.start_locked(&mut inner).await?;
        let code = format!("compileFile(\"{}\");", normalize_path(path));
        self.write_locked(&mut inner, &code).await
    }

    /// Run a single file.
    pub async fn run_current_file(&self, path: &str) -> Result<(), AdapterError> {
        let mut inner = self.inner.lock().await;
        self.clear_output_if_needed();
        self.diagnostics.clear();
        self.start_locked(&mut inner).await?;
        let code = format!("runFile(\"{}\");", normalize_path(path));
        self.write_locked(&mut inner, &code).await
    }

    /// Resolve the definition site for an offset in a file.
    ///
    /// The one operation returning a structured result: arms a
    /// location-extraction watch instead of a pattern pair, and resolves the
    /// [`SourceLocation`] parsed from the engine's reply.
    pub async fn goto(&self, path: &str, offset: u64) -> Result<SourceLocation, AdapterError> {
        self.diagnostics.clear();
        let mut inner = self.inner.lock().await;
        self.start_locked(&mut inner).await?;

        let watch = self.watcher.arm_location_watch();
        self.spawn_deadline_guard(watch.generation, watch.cancel.clone());
        let code = format!("runtime.refers(\"{}\", {offset});", normalize_path(path));
        self.write_locked(&mut inner, &code).await?;
        drop(inner);

        watch.wait().await
    }

    /// Send the debug-quit command. No-op when the engine is not running.
    ///
    /// A lighter-weight control signal than `stop`: neither output nor
    /// diagnostics are cleared.
    pub async fn quit_debug(&self) -> Result<(), AdapterError> {
        let mut inner = self.inner.lock().await;
        if inner.engine.is_none() {
            return Ok(());
        }
        self.write_locked(&mut inner, "quitDebug();").await
    }

    /// Mirror all subsequent engine output to a file as well as the sink.
    pub fn start_writing_output_file(&self, path: &Path) -> Result<(), AdapterError> {
        self.watcher.start_mirror(path)
    }

    /// Stop mirroring engine output to the file.
    pub fn stop_writing_output_file(&self) {
        self.watcher.stop_mirror()
    }

    /// Spawn the engine and wait for its readiness banner; no-op when it is
    /// already running. Must be called with the inner lock held.
    async fn start_locked(&self, inner: &mut Inner) -> Result<bool, AdapterError> {
        if let Some(current) = inner.engine.as_mut() {
            if current.is_running() {
                return Ok(false);
            }
            // The engine died underneath us; retire the handle and respawn.
            warn!("engine process exited unexpectedly, respawning");
            current.kill().await;
            inner.engine = None;
        }

        self.set_state(AdapterState::Starting);
        info!(
            binary = %self.config.binary.display(),
            root = %self.config.root_path.display(),
            arch = %self.config.architecture,
            "starting engine"
        );

        // Arm the readiness watch before wiring the output pump so the
        // banner chunk cannot race past it.
        let watch = self.watcher.arm_watch(Some(self.ready.clone()), None);

        let mut process = match EngineProcess::spawn(&self.config) {
            Ok(process) => process,
            Err(e) => {
                self.watcher.clear_watch();
                self.set_state(AdapterState::NotStarted);
                return Err(e);
            }
        };

        if let Some(mut output) = process.take_output() {
            let watcher = Arc::clone(&self.watcher);
            tokio::spawn(async move {
                while let Some(chunk) = output.next().await {
                    watcher.write(&chunk);
                }
            });
        }
        if let Some(mut errors) = process.take_errors() {
            let sink = Arc::clone(&self.sink);
            tokio::spawn(async move {
                while let Some(chunk) = errors.next().await {
                    // Engine-side failures are informational: they are not
                    // attributable to any single in-flight command.
                    warn!(chunk = chunk.trim_end(), "engine reported an error");
                    sink.write(&format!("[engine error: {chunk}]"));
                }
            });
        }

        inner.engine = Some(process);
        self.spawn_deadline_guard(watch.generation, watch.cancel.clone());

        match watch.wait().await {
            Ok(()) => {
                self.set_state(AdapterState::Running);
                info!("engine ready");
                Ok(true)
            }
            Err(e) => {
                // The banner never arrived; tear the spawn down.
                if let Some(mut process) = inner.engine.take() {
                    process.kill().await;
                }
                self.set_state(AdapterState::NotStarted);
                Err(e)
            }
        }
    }

    async fn write_locked(&self, inner: &mut Inner, code: &str) -> Result<(), AdapterError> {
        let engine = inner.engine.as_mut().ok_or(AdapterError::NotRunning)?;
        engine.write(code).await
    }

    /// Schedule the deadline guard for an armed watch. The guard settles the
    /// watch with a timeout unless the watch settles first and cancels it.
    fn spawn_deadline_guard(&self, generation: u64, cancel: CancellationToken) {
        let watcher = Arc::clone(&self.watcher);
        let timeout = self.config.response_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout) => watcher.expire(generation, timeout),
            }
        });
    }

    fn clear_output_if_needed(&self) {
        if self.config.clear_output_on_run {
            self.watcher.clear();
        }
    }

    fn set_state(&self, state: AdapterState) {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = state;
    }
}
