//! Local side of an exec session.
//!
//! The engine never touches the host terminal or signal handlers directly;
//! it goes through [`Console`] and [`SignalSource`] so sessions can be driven
//! without a real TTY.

use crate::runtime::{BoxedReader, BoxedWriter, WindowSize};
use berth_shared::errors::BerthResult;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Stream of events fed by background tasks.
///
/// Dropping the subscription aborts its feeders, then drops its guard.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    feeders: Vec<JoinHandle<()>>,
    _guard: Option<Box<dyn Send + Sync>>,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>, feeders: Vec<JoinHandle<()>>) -> Self {
        Self {
            rx,
            feeders,
            _guard: None,
        }
    }

    /// Keep `guard` alive until the subscription is dropped.
    pub fn with_guard(mut self, guard: impl Send + Sync + 'static) -> Self {
        self._guard = Some(Box::new(guard));
        self
    }

    /// A subscription fed by the caller through the returned sender.
    pub fn channel() -> (mpsc::UnboundedSender<T>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx, Vec::new()))
    }

    /// Next event; `None` once every feeder is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        for feeder in &self.feeders {
            feeder.abort();
        }
    }
}

/// Local terminal an interactive session runs on.
pub trait Console: Send {
    /// Current window size.
    fn size(&self) -> BerthResult<WindowSize>;

    /// Switch to raw mode.
    fn set_raw(&mut self) -> BerthResult<()>;

    /// Restore the state saved by [`Console::set_raw`]. Idempotent.
    fn reset(&mut self) -> BerthResult<()>;

    /// Window size changes.
    fn resize_events(&mut self) -> BerthResult<Subscription<WindowSize>>;
}

/// Source of locally received signals to relay to the remote process.
pub trait SignalSource: Send {
    fn subscribe(&mut self) -> BerthResult<Subscription<i32>>;
}

/// Holds a console in raw mode; restores it when dropped.
pub struct RawModeGuard<'a> {
    console: &'a mut dyn Console,
}

impl<'a> RawModeGuard<'a> {
    pub fn acquire(console: &'a mut dyn Console) -> BerthResult<Self> {
        console.set_raw()?;
        Ok(Self { console })
    }

    pub fn console(&mut self) -> &mut dyn Console {
        &mut *self.console
    }
}

impl Drop for RawModeGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.console.reset() {
            tracing::warn!(error = %e, "Failed to restore terminal state");
        }
    }
}

/// Everything the engine needs from the invoking process.
pub struct ExecStdio {
    pub stdin: BoxedReader,
    pub stdout: BoxedWriter,
    pub stderr: BoxedWriter,
    /// Required for terminal sessions.
    pub console: Option<Box<dyn Console>>,
    pub signals: Box<dyn SignalSource>,
}

impl ExecStdio {
    /// Standard streams, terminal and signals of the current process.
    pub fn host() -> Self {
        Self {
            stdin: Box::new(tokio::io::stdin()),
            stdout: Box::new(tokio::io::stdout()),
            stderr: Box::new(tokio::io::stderr()),
            console: Some(Box::new(super::tty::HostConsole::new())),
            signals: Box::new(super::signals::HostSignals),
        }
    }
}
