//! Single-writer async runtime and notice stream.

/// Notice stream types emitted by the runtime.
pub mod events;
/// Handle and command loop implementation.
pub mod handle;
