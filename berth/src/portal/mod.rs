//! Runtime daemon client over tonic/gRPC.
//!
//! [`GrpcRuntime`] implements the [`crate::runtime`] traits against the
//! `berth.v1.Runtime` service. Every request carries the active namespace.

pub mod connection;
mod process;
mod runtime;

pub use process::{GrpcProcess, GrpcTask};
pub use runtime::GrpcRuntime;
