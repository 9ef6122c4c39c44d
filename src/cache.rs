//! Concurrent token cache with lazy and periodic expiration.

pub mod store;

mod entry;
