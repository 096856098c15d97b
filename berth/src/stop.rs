//! Stopping running containers.
//!
//! Each reference is resolved to exactly one container, whose primary process
//! receives the container's stop signal. A container without a live task is
//! reported and skipped; a reference that cannot be resolved fails the
//! whole invocation.

use crate::resolver::Resolver;
use crate::runtime::{ContainerInfo, ContainerRecord, ContainerRuntime};
use berth_shared::constants::{labels, stop as defaults};
use berth_shared::errors::{BerthError, BerthResult};
use nix::sys::signal::Signal;
use std::io::Write;
use std::str::FromStr;
use std::time::Duration;

/// Options for [`stop`].
#[derive(Clone, Debug)]
pub struct StopOptions {
    /// Grace period before the runtime escalates to SIGKILL.
    pub timeout: Duration,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(defaults::DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl StopOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Result of stopping a single container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// The container had no live task.
    AlreadyStopped,
}

/// Parse a signal given by name (`SIGTERM`, `term`) or number (`15`).
pub fn parse_signal(value: &str) -> BerthResult<Signal> {
    let value = value.trim();
    if let Ok(number) = value.parse::<i32>() {
        return Signal::try_from(number)
            .map_err(|_| BerthError::InvalidArgument(format!("invalid signal number {}", value)));
    }

    let upper = value.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{}", upper)
    };
    Signal::from_str(&name)
        .map_err(|_| BerthError::InvalidArgument(format!("invalid signal {:?}", value)))
}

/// Stop signal configured on a container, SIGTERM if unset.
pub fn stop_signal(info: &ContainerInfo) -> BerthResult<Signal> {
    let value = info
        .labels
        .get(labels::STOP_SIGNAL)
        .map(String::as_str)
        .unwrap_or(defaults::DEFAULT_SIGNAL);
    parse_signal(value).map_err(|e| {
        BerthError::Config(format!(
            "container {} has an invalid {} label: {}",
            info.id,
            labels::STOP_SIGNAL,
            e
        ))
    })
}

/// Stop one resolved container.
pub async fn stop_container(
    runtime: &dyn ContainerRuntime,
    container: &ContainerRecord,
    options: &StopOptions,
) -> BerthResult<StopOutcome> {
    let info = runtime.info(&container.id).await?;
    let signal = stop_signal(&info)?;

    let task = match runtime.task(&container.id).await {
        Ok(task) => task,
        Err(e) if e.is_not_found() => {
            tracing::debug!(container_id = %container.id, "Container has no task");
            return Ok(StopOutcome::AlreadyStopped);
        }
        Err(e) => return Err(e),
    };

    tracing::debug!(
        container_id = %container.id,
        pid = task.pid(),
        signal = %signal,
        timeout_secs = options.timeout.as_secs(),
        "Stopping container"
    );
    match task.stop(signal as i32, options.timeout).await {
        Ok(()) => {
            tracing::info!(container_id = %container.id, "Container stopped");
            Ok(StopOutcome::Stopped)
        }
        Err(e) if e.is_not_found() => Ok(StopOutcome::AlreadyStopped),
        Err(e) => Err(e),
    }
}

/// Stop every container in `references`, in order.
///
/// Each successfully stopped reference is echoed to `out` exactly as given.
/// Containers without a live task are reported on `err` and skipped. The
/// first resolution or runtime failure aborts the remaining references.
pub async fn stop(
    runtime: &dyn ContainerRuntime,
    references: &[String],
    options: &StopOptions,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> BerthResult<()> {
    if references.is_empty() {
        return Err(BerthError::InvalidArgument(
            "stop requires at least one container".into(),
        ));
    }

    let resolver = Resolver::new(runtime);
    for reference in references {
        let container = resolver.resolve_unique(reference).await?;

        match stop_container(runtime, &container, options).await? {
            StopOutcome::Stopped => writeln!(out, "{}", reference)?,
            StopOutcome::AlreadyStopped => writeln!(err, "No such container: {}", reference)?,
        }
    }
    Ok(())
}
