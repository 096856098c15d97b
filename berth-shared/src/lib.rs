//! Berth shared code
//!
//! Common types, protocol definitions and errors used by the berth library,
//! the CLI and the test utilities.

pub mod constants;
pub mod errors;
pub mod transport;

// Generated protobuf types
pub mod generated {
    #![allow(clippy::all, unused_qualifications)]
    tonic::include_proto!("berth.v1");
}

pub use errors::{BerthError, BerthResult};
pub use transport::Transport;

// Runtime service
pub use generated::runtime_client::RuntimeClient;
pub use generated::runtime_server::{Runtime, RuntimeServer};

// All generated types
pub use generated::*;
