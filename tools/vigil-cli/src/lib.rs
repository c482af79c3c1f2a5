//! # Vigil CLI
//!
//! Client and renderers behind the `vigil` command.

pub mod client;
pub mod render;

pub use client::DaemonClient;
