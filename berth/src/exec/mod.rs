//! Running an additional process inside a running container.
//!
//! `exec` resolves the container reference, builds the process spec from the
//! container's template and the user's options, then hands it to the attach
//! engine.

pub mod attach;
pub mod capabilities;
pub mod env;
pub mod options;
pub mod signals;
pub mod spec;
pub mod stdio;
pub mod tty;
pub mod user;

pub use options::ExecOptions;
pub use signals::{FORWARDED_SIGNALS, HostSignals};
pub use spec::build_exec_process;
pub use stdio::{Console, ExecStdio, RawModeGuard, SignalSource, Subscription};
pub use tty::HostConsole;
pub use user::Identity;

use crate::resolver::Resolver;
use crate::runtime::{ContainerRecord, ContainerRuntime};
use berth_shared::errors::{BerthError, BerthResult};
use tokio_util::sync::CancellationToken;

/// Run `args[1..]` in the container referenced by `args[0]`.
///
/// A non-zero remote exit code surfaces as [`BerthError::ExecFailed`].
pub async fn exec(
    runtime: &dyn ContainerRuntime,
    args: &[String],
    options: &ExecOptions,
    stdio: ExecStdio,
    cancel: CancellationToken,
) -> BerthResult<()> {
    options.validate()?;

    let (reference, command) = args.split_first().ok_or_else(|| {
        BerthError::InvalidArgument("exec requires a container and a command".into())
    })?;
    if command.is_empty() {
        return Err(BerthError::InvalidArgument(
            "exec requires a command to run".into(),
        ));
    }

    let container = Resolver::new(runtime).resolve_unique(reference).await?;
    exec_in_container(runtime, &container, command, options, stdio, cancel).await
}

/// Run `command` in an already resolved container.
pub async fn exec_in_container(
    runtime: &dyn ContainerRuntime,
    container: &ContainerRecord,
    command: &[String],
    options: &ExecOptions,
    stdio: ExecStdio,
    cancel: CancellationToken,
) -> BerthResult<()> {
    let process = build_exec_process(runtime, &container.id, command, options).await?;
    let task = runtime.task(&container.id).await?;
    tracing::debug!(
        container_id = %container.id,
        pid = task.pid(),
        "Attaching exec process to running task"
    );
    attach::run(task.as_ref(), process, options, stdio, cancel).await
}
