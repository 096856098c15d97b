//! Container runtime client interface.
//!
//! The runtime daemon owns containers, tasks and processes. berth only
//! consumes the narrow surface below; [`crate::portal::GrpcRuntime`] is the
//! production implementation and `berth-test-utils` provides an in-memory one.
//!
//! All handles are `Send + Sync` and safe to share across concurrent
//! operations; a single runtime connection backs every in-flight call.

mod streams;
pub mod types;

pub use streams::{BoxedReader, BoxedWriter, EndOfInput, ExecStreams, StdinCloser};
pub use types::{ContainerInfo, ContainerRecord, ExecId, ExitStatus, WindowSize};

use async_trait::async_trait;
use berth_shared::errors::BerthResult;
use oci_spec::runtime::{Process, Spec};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Receiver for a process's exit status.
///
/// Obtained from [`ExecProcess::wait`] before the process is started.
pub type ExitReceiver = oneshot::Receiver<ExitStatus>;

/// Containers in the active namespace.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Active namespace all calls are scoped to.
    fn namespace(&self) -> &str;

    /// Enumerate containers.
    async fn list(&self) -> BerthResult<Vec<ContainerRecord>>;

    /// Stored OCI runtime spec of a container.
    async fn spec(&self, container_id: &str) -> BerthResult<Spec>;

    /// Descriptive record of a container.
    async fn info(&self, container_id: &str) -> BerthResult<ContainerInfo>;

    /// Read a file as seen from inside the container; `None` if absent.
    async fn read_file(&self, container_id: &str, path: &str) -> BerthResult<Option<Vec<u8>>>;

    /// Live task of a container.
    ///
    /// Fails with `NotFound` when the container has no task.
    async fn task(&self, container_id: &str) -> BerthResult<Arc<dyn Task>>;
}

/// A container's running task.
#[async_trait]
pub trait Task: Send + Sync {
    fn container_id(&self) -> &str;

    /// PID of the primary process.
    fn pid(&self) -> u32;

    /// Register an additional process. The process is created, not started.
    async fn exec(
        &self,
        exec_id: &ExecId,
        process: Process,
        streams: ExecStreams,
    ) -> BerthResult<Arc<dyn ExecProcess>>;

    /// Signal the primary process and wait up to `timeout` for it to exit.
    ///
    /// Escalation after the timeout is performed by the runtime. Fails with
    /// `NotFound` when the process no longer exists.
    async fn stop(&self, signal: i32, timeout: Duration) -> BerthResult<()>;
}

/// Runtime handle of one exec'd process.
#[async_trait]
pub trait ExecProcess: Send + Sync {
    fn id(&self) -> &ExecId;

    /// Subscribe to the exit status.
    ///
    /// Returns once the subscription is registered with the runtime, so a
    /// process started afterwards cannot exit unobserved.
    async fn wait(&self) -> BerthResult<ExitReceiver>;

    /// Start the process; returns its PID.
    async fn start(&self) -> BerthResult<u32>;

    async fn kill(&self, signal: i32) -> BerthResult<()>;

    async fn resize(&self, size: WindowSize) -> BerthResult<()>;

    /// Close the process's stdin. Idempotent.
    async fn close_stdin(&self) -> BerthResult<()>;

    /// Remove the runtime's bookkeeping entry for an exited process.
    async fn delete(&self) -> BerthResult<()>;
}
