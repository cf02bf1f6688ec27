//! In-memory authoritative store and index helpers.

/// Foreign-key index aliases.
pub mod indices;
/// Authoritative event/participant/score store.
pub mod store;
