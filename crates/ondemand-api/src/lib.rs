//! HTTP server for ondemand.
//!
//! Accepts CI webhooks, queues matching jobs for the in-process worker, and
//! serves the template expansion and job batch boundaries.

pub mod error;
pub mod routes;
pub mod state;

#[cfg(test)]
mod testing;

pub use state::AppState;
