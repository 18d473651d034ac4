//! The engine subprocess: spawn, pipes, and termination.
//!
//! Owns the OS-level child and its three pipes. Output and error chunks are
//! pumped into channels by background tasks so the child's pipes never block
//! the adapter's command path.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::AdapterError;

/// Read-buffer size for the chunk pumps. One successful read is one chunk;
/// bursts carry no boundary alignment with logical command outputs.
const CHUNK_BUF_SIZE: usize = 4096;

/// How long `kill` waits after SIGTERM before escalating to SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(2);

/// A live engine subprocess.
///
/// Owned exclusively by the adapter for its whole lifetime and replaced
/// wholesale on reset; no aliasing of an old instance survives past the
/// `kill` that retires it.
pub struct EngineProcess {
    child: Child,
    stdin: ChildStdin,
    /// Stdout chunk stream; `Option` so the watcher pump can take it once.
    output: Option<ReceiverStream<String>>,
    /// Stderr chunk stream; `Option` so the error pump can take it once.
    errors: Option<ReceiverStream<String>>,
}

impl std::fmt::Debug for EngineProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineProcess")
            .field("pid", &self.child.id())
            .finish()
    }
}

impl EngineProcess {
    /// Spawn the engine with the given configuration.
    ///
    /// The child runs in `config.root_path` and receives the root and target
    /// architecture as arguments; both are immutable for its lifetime.
    pub fn spawn(config: &EngineConfig) -> Result<Self, AdapterError> {
        let mut cmd = Command::new(&config.binary);
        cmd.arg("--root")
            .arg(&config.root_path)
            .arg("--arch")
            .arg(&config.architecture)
            .current_dir(&config.root_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| AdapterError::Spawn {
            binary: config.binary.display().to_string(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AdapterError::Io(std::io::Error::other("engine stdin pipe missing")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AdapterError::Io(std::io::Error::other("engine stdout pipe missing")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AdapterError::Io(std::io::Error::other("engine stderr pipe missing")))?;

        debug!(pid = child.id(), binary = %config.binary.display(), "engine spawned");

        Ok(Self {
            child,
            stdin,
            output: Some(ReceiverStream::new(pump_chunks(stdout, "stdout"))),
            errors: Some(ReceiverStream::new(pump_chunks(stderr, "stderr"))),
        })
    }

    /// OS process id, if the child has not been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Take the stdout chunk stream. Returns `None` after the first call.
    pub fn take_output(&mut self) -> Option<ReceiverStream<String>> {
        self.output.take()
    }

    /// Take the stderr chunk stream. Returns `None` after the first call.
    pub fn take_errors(&mut self) -> Option<ReceiverStream<String>> {
        self.errors.take()
    }

    /// Send one command to the engine. A trailing newline is added when the
    /// command does not already carry one, so the engine's line-oriented
    /// reader always sees a complete command line.
    pub async fn write(&mut self, command: &str) -> Result<(), AdapterError> {
        self.stdin.write_all(command.as_bytes()).await?;
        if !command.ends_with('\n') {
            self.stdin.write_all(b"\n").await?;
        }
        self.stdin.flush().await?;
        Ok(())
    }

    /// Whether the child is still alive.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Terminate the engine: SIGTERM, bounded wait, then SIGKILL.
    ///
    /// Resolves only once the process has exited, so no write can reach the
    /// old instance after this returns.
    pub async fn kill(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            // SAFETY: pid comes from a child we spawned.
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret != 0 {
                warn!(pid, "SIGTERM failed, proceeding to SIGKILL");
            }
        }

        match tokio::time::timeout(TERM_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(?status, "engine exited after SIGTERM");
            }
            _ => {
                debug!("engine did not exit after SIGTERM, sending SIGKILL");
                let _ = self.child.kill().await;
            }
        }
    }
}

/// Pump raw read bursts from a child pipe into a channel.
///
/// Each successful read is forwarded as one lossily-decoded chunk. The task
/// exits when the pipe closes or the receiver is dropped.
fn pump_chunks(
    pipe: impl AsyncRead + Unpin + Send + 'static,
    name: &'static str,
) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(async move {
        let mut pipe = pipe;
        let mut buf = [0u8; CHUNK_BUF_SIZE];
        loop {
            match pipe.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(pipe = name, error = %e, "error reading engine pipe");
                    break;
                }
            }
        }
        debug!(pipe = name, "engine pipe closed");
    });
    rx
}

/// Run the configured clean subcommand to completion and capture its output.
///
/// Blocks the caller (and therefore the adapter's command path) until the
/// external command returns. The combined stdout/stderr text is returned on
/// success; a non-zero exit is reported as [`AdapterError::CleanFailed`]
/// carrying the same captured text.
pub async fn run_clean(config: &EngineConfig) -> Result<String, AdapterError> {
    let Some((program, args)) = config.clean_command.split_first() else {
        return Ok(String::new());
    };

    let output = Command::new(program)
        .args(args)
        .current_dir(&config.root_path)
        .output()
        .await?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        return Err(AdapterError::CleanFailed {
            command: config.clean_command.join(" "),
            output: text,
        });
    }

    Ok(text)
}
