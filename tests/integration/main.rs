//! Integration test harness.

mod issuer_health;
mod key_sources;
