//! # Vigil Daemon
//!
//! Holds long-lived agent telemetry subscriptions and serves their latest
//! snapshots over HTTP.

mod routes;
mod state;

pub use routes::router;
pub use state::{offline_gateway, DaemonState, DepthView, SnapshotView};
