//! Local-side fakes: captured output, a scripted console and signal source.

use berth::exec::{Console, ExecStdio, SignalSource, Subscription};
use berth::runtime::{BoxedReader, WindowSize};
use berth_shared::BerthResult;
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

/// Writer that collects everything written to it.
#[derive(Clone, Default)]
pub struct CaptureWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CaptureWriter {
    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl AsyncWrite for CaptureWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.buf.lock().extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[derive(Default)]
struct ConsoleState {
    raw: AtomicBool,
    raw_count: AtomicUsize,
    reset_count: AtomicUsize,
    resize_senders: Mutex<Vec<mpsc::UnboundedSender<WindowSize>>>,
}

/// Console with a fixed size whose resizes are driven by a [`ConsoleProbe`].
pub struct FakeConsole {
    size: WindowSize,
    state: Arc<ConsoleState>,
}

/// Observes and drives a [`FakeConsole`].
#[derive(Clone)]
pub struct ConsoleProbe {
    state: Arc<ConsoleState>,
}

impl FakeConsole {
    pub fn new(size: WindowSize) -> (Self, ConsoleProbe) {
        let state = Arc::new(ConsoleState::default());
        (
            Self {
                size,
                state: state.clone(),
            },
            ConsoleProbe { state },
        )
    }
}

impl Console for FakeConsole {
    fn size(&self) -> BerthResult<WindowSize> {
        Ok(self.size)
    }

    fn set_raw(&mut self) -> BerthResult<()> {
        self.state.raw.store(true, Ordering::SeqCst);
        self.state.raw_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reset(&mut self) -> BerthResult<()> {
        if self.state.raw.swap(false, Ordering::SeqCst) {
            self.state.reset_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn resize_events(&mut self) -> BerthResult<Subscription<WindowSize>> {
        let (tx, subscription) = Subscription::channel();
        self.state.resize_senders.lock().push(tx);
        Ok(subscription)
    }
}

impl ConsoleProbe {
    pub fn is_raw(&self) -> bool {
        self.state.raw.load(Ordering::SeqCst)
    }

    pub fn raw_count(&self) -> usize {
        self.state.raw_count.load(Ordering::SeqCst)
    }

    pub fn reset_count(&self) -> usize {
        self.state.reset_count.load(Ordering::SeqCst)
    }

    /// Deliver a window change to every live subscription.
    pub fn resize(&self, size: WindowSize) {
        self.state
            .resize_senders
            .lock()
            .retain(|tx| tx.send(size).is_ok());
    }
}

/// Signal source driven by a [`SignalProbe`].
pub struct FakeSignals {
    senders: Arc<Mutex<Vec<mpsc::UnboundedSender<i32>>>>,
}

/// Raises signals on a [`FakeSignals`].
#[derive(Clone)]
pub struct SignalProbe {
    senders: Arc<Mutex<Vec<mpsc::UnboundedSender<i32>>>>,
}

impl FakeSignals {
    pub fn new() -> (Self, SignalProbe) {
        let senders = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                senders: senders.clone(),
            },
            SignalProbe { senders },
        )
    }
}

impl SignalSource for FakeSignals {
    fn subscribe(&mut self) -> BerthResult<Subscription<i32>> {
        let (tx, subscription) = Subscription::channel();
        self.senders.lock().push(tx);
        Ok(subscription)
    }
}

impl SignalProbe {
    /// Deliver `signal` to every live subscription; returns how many got it.
    pub fn raise(&self, signal: i32) -> usize {
        let mut senders = self.senders.lock();
        senders.retain(|tx| tx.send(signal).is_ok());
        senders.len()
    }

    /// True while some subscription is still alive.
    pub fn has_subscribers(&self) -> bool {
        let mut senders = self.senders.lock();
        senders.retain(|tx| !tx.is_closed());
        !senders.is_empty()
    }
}

/// Handles for inspecting a session built by [`fake_stdio`].
pub struct StdioProbe {
    pub stdout: CaptureWriter,
    pub stderr: CaptureWriter,
    pub console: ConsoleProbe,
    pub signals: SignalProbe,
}

/// Session stdio with captured output, a 24x80 console and fake signals.
pub fn fake_stdio(stdin: BoxedReader) -> (ExecStdio, StdioProbe) {
    let stdout = CaptureWriter::default();
    let stderr = CaptureWriter::default();
    let (console, console_probe) = FakeConsole::new(WindowSize::new(24, 80));
    let (signals, signal_probe) = FakeSignals::new();

    let stdio = ExecStdio {
        stdin,
        stdout: Box::new(stdout.clone()),
        stderr: Box::new(stderr.clone()),
        console: Some(Box::new(console)),
        signals: Box::new(signals),
    };
    (
        stdio,
        StdioProbe {
            stdout,
            stderr,
            console: console_probe,
            signals: signal_probe,
        },
    )
}
