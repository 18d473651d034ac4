//! Core of stoker: drive a long-running compiler engine through a textual
//! command protocol and turn its unstructured output stream into discrete,
//! awaitable results.
//!
//! Two components compose the core:
//!
//! - [`adapter::EngineAdapter`] owns the engine subprocess's lifecycle,
//!   serializes every outbound command, and exposes an async
//!   request/response surface.
//! - [`watcher::OutputWatcher`] consumes every chunk the engine emits,
//!   mirrors it to a sink, and settles the single armed watch (success
//!   pattern, failure pattern, deadline) the moment a chunk matches.

pub mod adapter;
pub mod config;
pub mod engine;
pub mod error;
pub mod location;
pub mod sink;
pub mod statement;
pub mod watcher;

pub use adapter::{AdapterState, EngineAdapter};
pub use config::EngineConfig;
pub use error::AdapterError;
pub use location::SourceLocation;
pub use sink::{DiagnosticsSink, MemorySink, NullDiagnostics, OutputSink, StdoutSink};
pub use statement::{Statement, normalize_path};
pub use watcher::OutputWatcher;
