//! berth - exec and stop for containers held by a container runtime daemon.
//!
//! The library resolves user-typed container references, derives process
//! specs for additional processes, drives their attach/lifecycle protocol,
//! and stops containers with their configured signal.

pub mod exec;
pub mod portal;
pub mod resolver;
pub mod runtime;
pub mod stop;
pub mod util;

pub use berth_shared::errors::{BerthError, BerthResult};
pub use berth_shared::Transport;
pub use exec::{ExecOptions, ExecStdio, exec};
pub use portal::GrpcRuntime;
pub use resolver::{Resolution, Resolver};
pub use runtime::{ContainerRecord, ContainerRuntime, ExecProcess, Task};
pub use stop::{StopOptions, StopOutcome, stop};
