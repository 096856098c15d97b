//! Host terminal handling for interactive sessions.

use super::stdio::{Console, Subscription};
use crate::runtime::WindowSize;
use crate::util::get_terminal_size;
use berth_shared::errors::{BerthError, BerthResult};
use nix::sys::termios::{SetArg, Termios, cfmakeraw, tcgetattr, tcsetattr};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;

/// Set while some console in this process holds the terminal raw.
static RAW_SESSION: AtomicBool = AtomicBool::new(false);

/// The invoking process's terminal, reached through standard input.
///
/// At most one `HostConsole` may hold the terminal raw at a time.
pub struct HostConsole {
    saved: Option<Termios>,
}

impl HostConsole {
    pub fn new() -> Self {
        Self { saved: None }
    }

    /// True if standard input is a terminal.
    pub fn is_terminal() -> bool {
        use std::io::IsTerminal;
        std::io::stdin().is_terminal()
    }
}

impl Default for HostConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Console for HostConsole {
    fn size(&self) -> BerthResult<WindowSize> {
        let (rows, cols) = get_terminal_size();
        Ok(WindowSize::new(rows, cols))
    }

    fn set_raw(&mut self) -> BerthResult<()> {
        if self.saved.is_some() {
            return Ok(());
        }
        if RAW_SESSION
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BerthError::Terminal(
                "terminal is already held by another session".into(),
            ));
        }

        let stdin = std::io::stdin();
        let result = tcgetattr(&stdin).and_then(|original| {
            let mut raw = original.clone();
            cfmakeraw(&mut raw);
            tcsetattr(&stdin, SetArg::TCSANOW, &raw).map(|_| original)
        });

        match result {
            Ok(original) => {
                tracing::debug!("Terminal switched to raw mode");
                self.saved = Some(original);
                Ok(())
            }
            Err(errno) => {
                RAW_SESSION.store(false, Ordering::SeqCst);
                Err(BerthError::Terminal(format!(
                    "failed to set raw mode: {}",
                    errno
                )))
            }
        }
    }

    fn reset(&mut self) -> BerthResult<()> {
        let Some(original) = self.saved.take() else {
            return Ok(());
        };
        RAW_SESSION.store(false, Ordering::SeqCst);

        tcsetattr(&std::io::stdin(), SetArg::TCSANOW, &original)
            .map_err(|errno| BerthError::Terminal(format!("failed to restore terminal: {}", errno)))?;
        tracing::debug!("Terminal restored");
        Ok(())
    }

    fn resize_events(&mut self) -> BerthResult<Subscription<WindowSize>> {
        let mut winch = signal(SignalKind::window_change())?;
        let (tx, rx) = mpsc::unbounded_channel();

        let feeder = tokio::spawn(async move {
            while winch.recv().await.is_some() {
                let (rows, cols) = get_terminal_size();
                if tx.send(WindowSize::new(rows, cols)).is_err() {
                    break;
                }
            }
        });
        Ok(Subscription::new(rx, vec![feeder]))
    }
}

impl Drop for HostConsole {
    fn drop(&mut self) {
        if let Err(e) = self.reset() {
            tracing::warn!(error = %e, "Failed to restore terminal on drop");
        }
    }
}
