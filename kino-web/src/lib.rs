//! Kino Web - HTTP streaming server

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
//!
//! Serves library videos as live transcoded streams and exposes a small JSON
//! API for the library, stream statistics and health.

pub mod handlers;
pub mod server;

pub use server::{AppState, ServerError, build_router, run_server, shutdown_on_ctrl_c};
