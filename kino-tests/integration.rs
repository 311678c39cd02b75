//! Integration tests for Kino
//!
//! These tests drive the lock table, the process runner and the HTTP layer
//! together, with a shell script standing in for the encoder.

#[path = "integration/http_streaming.rs"]
mod http_streaming;
#[path = "integration/lock_semantics.rs"]
mod lock_semantics;
#[path = "integration/process_lifecycle.rs"]
mod process_lifecycle;
