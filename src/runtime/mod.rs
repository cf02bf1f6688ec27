//! Single-writer store task, its handle, and live subscriptions.

/// Change notifications emitted by the store task.
pub mod events;
/// Handle and command loop implementation.
pub mod handle;
/// Cancelable per-query snapshot streams.
pub mod subscription;
/// Batched document write-back to a sink.
mod write_back;
