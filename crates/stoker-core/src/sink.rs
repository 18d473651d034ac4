//! Output and diagnostics collaborators.
//!
//! The adapter never interprets engine output beyond watch matching; it
//! forwards every chunk to an [`OutputSink`] in emission order, armed watch
//! or not. [`DiagnosticsSink`] receives a `clear()` before most command
//! dispatches; no structured diagnostics flow through this crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Receives engine output in emission order.
pub trait OutputSink: Send + Sync {
    /// Append a chunk of engine output.
    fn write(&self, text: &str);

    /// Drop all visible content.
    fn clear(&self);
}

/// The diagnostics collaborator: cleared before most command dispatches so
/// stale markers never outlive the output that produced them.
pub trait DiagnosticsSink: Send + Sync {
    /// Discard any pending diagnostic markers.
    fn clear(&self);
}

// Compile-time assertion: both collaborator traits must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn OutputSink, _: &dyn DiagnosticsSink) {}
};

/// Sink that accumulates output in memory.
///
/// The default for tests, and useful for embedders that render the output
/// surface themselves.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buf: Arc<Mutex<String>>,
    clears: Arc<AtomicUsize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written since the last `clear()`.
    pub fn contents(&self) -> String {
        self.lock_buf().clone()
    }

    /// How many times `clear()` has been called.
    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    fn lock_buf(&self) -> MutexGuard<'_, String> {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OutputSink for MemorySink {
    fn write(&self, text: &str) {
        self.lock_buf().push_str(text);
    }

    fn clear(&self) {
        self.lock_buf().clear();
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sink that prints chunks to stdout as they arrive.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write(&self, text: &str) {
        print!("{text}");
    }

    fn clear(&self) {
        // Nothing to retract from a terminal; the clear is a policy event,
        // not a repaint.
    }
}

/// Diagnostics collaborator that ignores every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDiagnostics;

impl DiagnosticsSink for NullDiagnostics {
    fn clear(&self) {}
}

/// Diagnostics collaborator that counts `clear()` calls (test double).
#[derive(Debug, Clone, Default)]
pub struct CountingDiagnostics {
    clears: Arc<AtomicUsize>,
}

impl CountingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl DiagnosticsSink for CountingDiagnostics {
    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_accumulates_in_order() {
        let sink = MemorySink::new();
        sink.write("first ");
        sink.write("second");
        assert_eq!(sink.contents(), "first second");
    }

    #[test]
    fn memory_sink_clear_drops_content_and_counts() {
        let sink = MemorySink::new();
        sink.write("stale");
        sink.clear();
        assert_eq!(sink.contents(), "");
        assert_eq!(sink.clear_count(), 1);

        sink.write("fresh");
        assert_eq!(sink.contents(), "fresh");
    }

    #[test]
    fn memory_sink_clones_share_the_buffer() {
        let sink = MemorySink::new();
        let alias = sink.clone();
        sink.write("shared");
        assert_eq!(alias.contents(), "shared");
    }

    #[test]
    fn counting_diagnostics_records_clears() {
        let diagnostics = CountingDiagnostics::new();
        diagnostics.clear();
        diagnostics.clear();
        assert_eq!(diagnostics.clear_count(), 2);
    }

    #[test]
    fn sinks_are_usable_as_trait_objects() {
        let sink: Arc<dyn OutputSink> = Arc::new(MemorySink::new());
        sink.write("via dyn");
        sink.clear();

        let diagnostics: Arc<dyn DiagnosticsSink> = Arc::new(NullDiagnostics);
        diagnostics.clear();
    }
}
