//! IO stream set handed to the runtime when a process is created.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::oneshot;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Standard streams attached to one exec'd process.
///
/// The runtime owns copying between these and the remote process once the
/// set is handed to [`Task::exec`](super::Task::exec).
pub struct ExecStreams {
    /// Input; `None` when the session is not interactive.
    pub stdin: Option<BoxedReader>,
    pub stdout: BoxedWriter,
    pub stderr: BoxedWriter,
    /// Remote side allocates a pseudo-terminal; stderr is merged into stdout.
    pub terminal: bool,
}

impl ExecStreams {
    pub fn new(stdin: Option<BoxedReader>, stdout: BoxedWriter, stderr: BoxedWriter) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
            terminal: false,
        }
    }

    /// Mark the set for terminal semantics.
    pub fn with_terminal(mut self, terminal: bool) -> Self {
        self.terminal = terminal;
        self
    }
}

impl fmt::Debug for ExecStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecStreams")
            .field("stdin", &self.stdin.is_some())
            .field("terminal", &self.terminal)
            .finish_non_exhaustive()
    }
}

/// Reader that reports, once, when its inner reader reaches end-of-input.
///
/// The exec engine uses the notification to ask the runtime to close the
/// remote process's stdin.
pub struct StdinCloser<R> {
    inner: R,
    on_eof: Option<oneshot::Sender<()>>,
}

/// Fires when the wrapped input hits end-of-input.
///
/// Resolves to `false` if the reader was dropped before reaching EOF.
pub struct EndOfInput {
    rx: oneshot::Receiver<()>,
}

impl EndOfInput {
    pub async fn wait(self) -> bool {
        self.rx.await.is_ok()
    }
}

impl<R> StdinCloser<R> {
    pub fn new(inner: R) -> (Self, EndOfInput) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                inner,
                on_eof: Some(tx),
            },
            EndOfInput { rx },
        )
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for StdinCloser<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);

        // Ready with nothing read into a non-full buffer is EOF
        if matches!(poll, Poll::Ready(Ok(())))
            && buf.filled().len() == before
            && buf.remaining() > 0
            && let Some(tx) = self.on_eof.take()
        {
            tracing::trace!("Attached input reached EOF");
            let _ = tx.send(());
        }

        poll
    }
}
