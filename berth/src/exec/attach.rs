//! Attach/lifecycle engine for one exec'd process.
//!
//! Built -> streams attached -> started -> (detached | waiting) -> exited.
//!
//! In attached mode the exit subscription is registered before the process
//! is started, and the bookkeeping entry is deleted on every exit path.
//! Terminal state and signal handlers are scoped to the session and torn
//! down before the entry is deleted.

use super::options::ExecOptions;
use super::stdio::{Console, ExecStdio, RawModeGuard, SignalSource, Subscription};
use crate::runtime::{
    BoxedReader, ExecId, ExecProcess, ExecStreams, ExitReceiver, StdinCloser, Task, WindowSize,
};
use berth_shared::errors::{BerthError, BerthResult};
use oci_spec::runtime::Process;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What runs alongside the exit wait.
enum Forwarding {
    Resize {
        initial: Option<WindowSize>,
        events: Option<Subscription<WindowSize>>,
    },
    Signals(Subscription<i32>),
}

/// Run `process_spec` inside `task` and report its outcome.
///
/// Returns `ExecFailed` for a non-zero exit code, `Cancelled` when `cancel`
/// fires first, and runtime errors unmodified.
pub async fn run(
    task: &dyn Task,
    process_spec: Process,
    options: &ExecOptions,
    stdio: ExecStdio,
    cancel: CancellationToken,
) -> BerthResult<()> {
    let ExecStdio {
        stdin,
        stdout,
        stderr,
        mut console,
        mut signals,
    } = stdio;

    let (stdin, end_of_input) = if options.interactive {
        let (closer, eof) = StdinCloser::new(stdin);
        (Some(Box::new(closer) as BoxedReader), Some(eof))
    } else {
        (None, None)
    };
    let streams = ExecStreams::new(stdin, stdout, stderr).with_terminal(options.tty);

    let exec_id = ExecId::new();
    let process = task.exec(&exec_id, process_spec, streams).await?;
    tracing::debug!(
        container_id = %task.container_id(),
        exec_id = %exec_id,
        tty = options.tty,
        interactive = options.interactive,
        "Exec process created"
    );

    let stdin_closer = end_of_input.map(|eof| {
        let process = Arc::clone(&process);
        tokio::spawn(async move {
            if eof.wait().await
                && let Err(e) = process.close_stdin().await
            {
                tracing::warn!(exec_id = %process.id(), error = %e, "Failed to close exec stdin");
            }
        })
    });

    if options.detach {
        let pid = process.start().await?;
        tracing::info!(
            container_id = %task.container_id(),
            exec_id = %exec_id,
            pid,
            "Exec process started detached"
        );
        return Ok(());
    }

    let result = attached(
        process.as_ref(),
        options,
        console.as_deref_mut(),
        signals.as_mut(),
        &cancel,
    )
    .await;

    if let Some(closer) = stdin_closer {
        closer.abort();
    }
    if let Err(e) = process.delete().await {
        tracing::warn!(exec_id = %exec_id, error = %e, "Failed to delete exec process");
    }

    match &result {
        Ok(()) => tracing::debug!(exec_id = %exec_id, "Exec process exited"),
        Err(e) => tracing::debug!(exec_id = %exec_id, error = %e, "Exec session ended with error"),
    }
    result
}

async fn attached(
    process: &dyn ExecProcess,
    options: &ExecOptions,
    console: Option<&mut (dyn Console + 'static)>,
    signals: &mut dyn SignalSource,
    cancel: &CancellationToken,
) -> BerthResult<()> {
    // Subscribe before start so a fast exit cannot be missed
    let exit_rx = process.wait().await?;

    let _raw_guard;
    let forwarding = if options.tty {
        let console = console.ok_or_else(|| {
            BerthError::Terminal("terminal requested but no console is available".into())
        })?;
        let mut guard = RawModeGuard::acquire(console)?;

        let initial = guard
            .console()
            .size()
            .inspect_err(|e| tracing::warn!(error = %e, "Failed to read terminal size"))
            .ok();
        let events = guard
            .console()
            .resize_events()
            .inspect_err(|e| tracing::warn!(error = %e, "Failed to watch terminal resize"))
            .ok();

        _raw_guard = guard;
        Forwarding::Resize { initial, events }
    } else {
        Forwarding::Signals(signals.subscribe()?)
    };

    let session = async {
        let pid = process.start().await?;
        tracing::debug!(exec_id = %process.id(), pid, "Exec process started");
        wait_exit(exit_rx).await
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(exec_id = %process.id(), "Exec session cancelled");
            Err(BerthError::Cancelled)
        }
        result = session => result,
        never = forward(process, forwarding) => match never {},
    }
}

async fn wait_exit(exit_rx: ExitReceiver) -> BerthResult<()> {
    let status = exit_rx
        .await
        .map_err(|_| BerthError::Internal("exit status channel closed".into()))?;

    match status.result()? {
        0 => Ok(()),
        code => Err(BerthError::ExecFailed { code }),
    }
}

/// Relay resize events or signals until the session ends.
async fn forward(process: &dyn ExecProcess, forwarding: Forwarding) -> Infallible {
    match forwarding {
        Forwarding::Resize { initial, events } => {
            if let Some(size) = initial {
                resize(process, size).await;
            }
            if let Some(mut events) = events {
                while let Some(size) = events.recv().await {
                    resize(process, size).await;
                }
            }
        }
        Forwarding::Signals(mut signals) => {
            while let Some(signum) = signals.recv().await {
                tracing::debug!(exec_id = %process.id(), signal = signum, "Forwarding signal");
                if let Err(e) = process.kill(signum).await {
                    tracing::warn!(
                        exec_id = %process.id(),
                        signal = signum,
                        error = %e,
                        "Failed to forward signal"
                    );
                }
            }
        }
    }
    std::future::pending().await
}

async fn resize(process: &dyn ExecProcess, size: WindowSize) {
    if let Err(e) = process.resize(size).await {
        tracing::warn!(
            exec_id = %process.id(),
            rows = size.rows,
            cols = size.cols,
            error = %e,
            "Failed to resize exec terminal"
        );
    }
}
