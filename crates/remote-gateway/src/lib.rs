//! # Remote Gateway
//!
//! Transports implementing [`vigil_core::RemoteGateway`]:
//! - [`HttpGateway`] talks to the hosted record store and its functions
//! - [`MemoryGateway`] keeps everything in process, for offline runs and tests

pub use vigil_core;

mod http;
mod memory;

pub use http::{query_params, HttpGateway};
pub use memory::{Fault, MemoryGateway, ProcedureHandler};

// Re-export core types for convenience
pub use vigil_core::{Filter, Order, Record, RecordQuery, RemoteGateway, Result, SyncError};
