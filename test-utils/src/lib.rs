//! Shared test support for berth crates.
//!
//! - [`FakeRuntime`]: in-memory runtime with scripted containers and exec
//!   behaviour that records every call it receives
//! - [`FakeDaemon`]: the same runtime served over gRPC on a Unix socket
//! - [`fake_stdio`]: captured output plus a fake console and signal source

pub mod daemon;
pub mod runtime;
pub mod stdio;

pub use daemon::FakeDaemon;
pub use runtime::{Call, ContainerFixture, ExecScript, FakeRuntime, TaskState};
pub use stdio::{
    CaptureWriter, ConsoleProbe, FakeConsole, FakeSignals, SignalProbe, StdioProbe, fake_stdio,
};
