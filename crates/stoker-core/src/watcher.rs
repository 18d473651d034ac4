//! The output watch: passive mirroring plus single-slot correlation.
//!
//! Every chunk the engine emits flows through [`OutputWatcher::write`] in
//! emission order, armed watch or not. The watch slot holds at most one
//! outstanding watch; arming over a live watch displaces it. The slot is a
//! deliberate design constraint, not a queue: the engine processes one
//! command line at a time and emits a single uninterrupted response stream.

use std::io::Write as _;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use regex::Regex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AdapterError;
use crate::location::{self, SourceLocation};
use crate::sink::OutputSink;

/// What an armed watch is waiting for.
enum WatchKind {
    /// Success/failure regex pair. Success is always tested first.
    Pattern {
        success: Option<Regex>,
        failure: Option<Regex>,
        tx: oneshot::Sender<Result<(), AdapterError>>,
    },
    /// Location-extraction watch for goto replies.
    Location {
        tx: oneshot::Sender<Result<SourceLocation, AdapterError>>,
    },
}

/// The single armed watch.
struct ArmedWatch {
    kind: WatchKind,
    /// Identifies this arming; a deadline guard checks it before expiring,
    /// so a displaced watch's timer cannot disarm its replacement.
    generation: u64,
    /// Cancelled when the watch settles, stopping its deadline guard.
    deadline: CancellationToken,
}

struct WatcherState {
    armed: Option<ArmedWatch>,
    next_generation: u64,
    /// When active, every chunk is also appended here.
    mirror: Option<std::fs::File>,
}

/// Handle returned by arming a watch.
///
/// Await [`Watch::wait`] for the settled result. `cancel` stops the deadline
/// guard once the watch settles; `generation` lets the guard expire exactly
/// the arming it belongs to.
pub struct Watch<T> {
    rx: oneshot::Receiver<Result<T, AdapterError>>,
    pub generation: u64,
    pub cancel: CancellationToken,
}

impl<T> Watch<T> {
    /// Wait for the watch to settle.
    pub async fn wait(self) -> Result<T, AdapterError> {
        match self.rx.await {
            Ok(result) => result,
            // The sender only disappears unsent if the watcher itself is
            // dropped while the watch is armed.
            Err(_) => Err(AdapterError::WatchCancelled),
        }
    }
}

/// Consumes every chunk of engine output and settles the armed watch.
pub struct OutputWatcher {
    sink: std::sync::Arc<dyn OutputSink>,
    state: Mutex<WatcherState>,
}

impl std::fmt::Debug for OutputWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputWatcher")
            .field("armed", &self.is_armed())
            .finish()
    }
}

impl OutputWatcher {
    pub fn new(sink: std::sync::Arc<dyn OutputSink>) -> Self {
        Self {
            sink,
            state: Mutex::new(WatcherState {
                armed: None,
                next_generation: 0,
                mirror: None,
            }),
        }
    }

    /// Feed one chunk of engine output.
    ///
    /// The chunk always reaches the sink (and the mirror file when active),
    /// in emission order; watch matching happens afterward. An armed pattern
    /// watch tests success first, then failure; a chunk matching neither
    /// leaves the watch armed for the next chunk.
    pub fn write(&self, chunk: &str) {
        self.sink.write(chunk);

        let mut state = self.state();

        let mut drop_mirror = false;
        if let Some(file) = state.mirror.as_mut() {
            if let Err(e) = file.write_all(chunk.as_bytes()) {
                warn!(error = %e, "failed to mirror output chunk; stopping mirror");
                drop_mirror = true;
            }
        }
        if drop_mirror {
            state.mirror = None;
        }

        let Some(watch) = state.armed.take() else {
            return;
        };
        state.armed = Self::settle_or_rearm(watch, chunk);
    }

    /// Arm a pattern watch, displacing any live watch.
    ///
    /// The displaced watch is settled with [`AdapterError::WatchCancelled`];
    /// callers issuing overlapping correlated commands race by design and
    /// must serialize themselves if they care which command owns the output.
    pub fn arm_watch(&self, success: Option<Regex>, failure: Option<Regex>) -> Watch<()> {
        let (tx, rx) = oneshot::channel();
        self.arm(|generation, deadline| {
            (
                ArmedWatch {
                    kind: WatchKind::Pattern {
                        success,
                        failure,
                        tx,
                    },
                    generation,
                    deadline,
                },
                rx,
            )
        })
    }

    /// Arm a location watch, displacing any live watch.
    pub fn arm_location_watch(&self) -> Watch<SourceLocation> {
        let (tx, rx) = oneshot::channel();
        self.arm(|generation, deadline| {
            (
                ArmedWatch {
                    kind: WatchKind::Location { tx },
                    generation,
                    deadline,
                },
                rx,
            )
        })
    }

    /// Disarm the current watch, settling it with
    /// [`AdapterError::WatchCancelled`]. No-op when nothing is armed.
    pub fn clear_watch(&self) {
        if let Some(watch) = self.state().armed.take() {
            debug!(generation = watch.generation, "output watch cleared");
            Self::cancel_watch(watch);
        }
    }

    /// Expire the watch armed as `generation`, settling it with
    /// [`AdapterError::WatchTimeout`]. No-op if that arming already settled
    /// or was displaced.
    pub fn expire(&self, generation: u64, waited: Duration) {
        let mut state = self.state();
        match &state.armed {
            Some(watch) if watch.generation == generation => {}
            _ => return,
        }
        let Some(watch) = state.armed.take() else {
            return;
        };
        drop(state);

        warn!(generation, ?waited, "watch expired without a matching chunk");
        match watch.kind {
            WatchKind::Pattern { tx, .. } => {
                let _ = tx.send(Err(AdapterError::WatchTimeout(waited)));
            }
            WatchKind::Location { tx } => {
                let _ = tx.send(Err(AdapterError::WatchTimeout(waited)));
            }
        }
    }

    /// Whether a watch is currently armed.
    pub fn is_armed(&self) -> bool {
        self.state().armed.is_some()
    }

    /// Clear the visible sink content. Independent of watch state.
    pub fn clear(&self) {
        self.sink.clear();
    }

    /// Mirror every subsequent chunk to a file, appending.
    pub fn start_mirror(&self, path: &Path) -> Result<(), AdapterError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        self.sink
            .write(&format!("[output is now mirrored to {}]\n", path.display()));
        self.state().mirror = Some(file);
        Ok(())
    }

    /// Stop mirroring chunks to the file. No-op when no mirror is active.
    pub fn stop_mirror(&self) {
        if self.state().mirror.take().is_some() {
            self.sink.write("[stopped mirroring output to file]\n");
        }
    }

    fn arm<T>(
        &self,
        make: impl FnOnce(u64, CancellationToken) -> (ArmedWatch, oneshot::Receiver<Result<T, AdapterError>>),
    ) -> Watch<T> {
        let mut state = self.state();
        let generation = state.next_generation;
        state.next_generation += 1;
        let cancel = CancellationToken::new();

        let (watch, rx) = make(generation, cancel.clone());
        if let Some(old) = state.armed.replace(watch) {
            debug!(
                displaced = old.generation,
                generation, "arming displaced a live watch"
            );
            Self::cancel_watch(old);
        }

        Watch {
            rx,
            generation,
            cancel,
        }
    }

    /// Test a chunk against an armed watch; hand the watch back if it did
    /// not settle.
    fn settle_or_rearm(watch: ArmedWatch, chunk: &str) -> Option<ArmedWatch> {
        let ArmedWatch {
            kind,
            generation,
            deadline,
        } = watch;

        match kind {
            WatchKind::Pattern {
                success,
                failure,
                tx,
            } => {
                // Success first: a chunk matching both patterns settles as
                // success.
                if success.as_ref().is_some_and(|re| re.is_match(chunk)) {
                    deadline.cancel();
                    debug!(generation, "watch resolved on success pattern");
                    let _ = tx.send(Ok(()));
                    None
                } else if failure.as_ref().is_some_and(|re| re.is_match(chunk)) {
                    deadline.cancel();
                    debug!(generation, "watch rejected on failure pattern");
                    let _ = tx.send(Err(AdapterError::WatchFailure(chunk.to_string())));
                    None
                } else {
                    Some(ArmedWatch {
                        kind: WatchKind::Pattern {
                            success,
                            failure,
                            tx,
                        },
                        generation,
                        deadline,
                    })
                }
            }
            WatchKind::Location { tx } => match location::extract_location(chunk) {
                Some(location) => {
                    deadline.cancel();
                    debug!(generation, "location watch resolved");
                    let _ = tx.send(Ok(location));
                    None
                }
                None => Some(ArmedWatch {
                    kind: WatchKind::Location { tx },
                    generation,
                    deadline,
                }),
            },
        }
    }

    fn cancel_watch(watch: ArmedWatch) {
        watch.deadline.cancel();
        match watch.kind {
            WatchKind::Pattern { tx, .. } => {
                let _ = tx.send(Err(AdapterError::WatchCancelled));
            }
            WatchKind::Location { tx } => {
                let _ = tx.send(Err(AdapterError::WatchCancelled));
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, WatcherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
