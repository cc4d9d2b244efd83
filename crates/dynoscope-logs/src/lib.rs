//! Log streaming core for dynoscope
//!
//! This crate owns the live log stream sessions: line assembly across chunk
//! boundaries, extraction of typed lifecycle events from platform log lines,
//! per-application stream sessions with a bounded replay buffer, and the
//! multiplexer that keeps one session per tracked application.

mod assemble;
mod buffer;
mod extract;
mod mux;
mod session;
#[cfg(test)]
mod testutil;
mod visibility;

pub use assemble::{LineAssembler, split_lines};
pub use buffer::LineRing;
pub use extract::EventExtractor;
pub use mux::LogStreamMultiplexer;
pub use session::{DEFAULT_RING_CAPACITY, LogStreamSession, SessionLifecycle};
pub use visibility::{PresentationSurface, VisibilityArbiter};

// Re-export types used in our public API
pub use dynoscope_types::{App, LogEvent, StreamEvent};
