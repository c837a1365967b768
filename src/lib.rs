//! Dynamic edge router.
//!
//! Backend services register themselves, declare resources and
//! applications, and receive versioned configuration from the router. The
//! router authenticates client requests against the owning application's
//! authenticator and forwards them to the service handling the path.

pub mod api;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod graph;
pub mod listener;
pub mod logging;
pub mod metrics;
pub mod registry;
pub mod rollout;
pub mod service;
pub mod transport;
pub(crate) mod utils;

#[cfg(test)]
mod testing;
