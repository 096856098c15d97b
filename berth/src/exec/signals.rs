//! Relaying locally received signals to an exec'd process.
//!
//! Handlers are registered with signal-hook on first use and stay registered
//! for the life of the process. They feed a socket pair while a subscription
//! is active. Otherwise a signal whose disposition was the default before
//! registration gets the default action emulated, so the process reacts to
//! SIGINT, SIGTERM and friends as if nothing had been installed.

use super::stdio::{SignalSource, Subscription};
use berth_shared::errors::{BerthError, BerthResult};
use parking_lot::Mutex;
use std::io::{ErrorKind, Read};
use std::os::fd::{IntoRawFd, RawFd};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;
use tokio::sync::mpsc;

/// Signals relayed to the remote process in non-terminal sessions.
///
/// SIGKILL/SIGSTOP cannot be caught, SIGCHLD and SIGPIPE describe local
/// events, and SIGWINCH is handled by the console resize path.
pub const FORWARDED_SIGNALS: &[i32] = &[
    libc::SIGHUP,
    libc::SIGINT,
    libc::SIGQUIT,
    libc::SIGTERM,
    libc::SIGUSR1,
    libc::SIGUSR2,
    libc::SIGALRM,
    libc::SIGCONT,
    libc::SIGTSTP,
    libc::SIGTTIN,
    libc::SIGTTOU,
];

/// Set while a subscription is relaying signals.
static FORWARDING: AtomicBool = AtomicBool::new(false);

/// Read end of the relay socket, created with the handlers.
static RELAY: Mutex<Option<StdUnixStream>> = Mutex::new(None);

/// Signal handlers of the invoking process.
///
/// Signals are relayed while the returned subscription is alive; at most one
/// subscription may be active at a time.
pub struct HostSignals;

impl SignalSource for HostSignals {
    fn subscribe(&mut self) -> BerthResult<Subscription<i32>> {
        let mut reader = relay_reader()?;

        if FORWARDING
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BerthError::Terminal(
                "signals are already forwarded to another session".into(),
            ));
        }
        let forwarding = Forwarding;

        drain(&mut reader)?;
        let mut stream = UnixStream::from_std(reader)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let feeder = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            while let Ok(n) = stream.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                for &signum in &buf[..n] {
                    if tx.send(i32::from(signum)).is_err() {
                        return;
                    }
                }
            }
        });

        tracing::debug!("Signal forwarding enabled");
        Ok(Subscription::new(rx, vec![feeder]).with_guard(forwarding))
    }
}

/// Clears [`FORWARDING`] when the subscription goes away.
struct Forwarding;

impl Drop for Forwarding {
    fn drop(&mut self) {
        FORWARDING.store(false, Ordering::SeqCst);
        tracing::debug!("Signal forwarding disabled");
    }
}

/// A fresh handle on the relay socket, registering the handlers first if needed.
fn relay_reader() -> BerthResult<StdUnixStream> {
    let mut relay = RELAY.lock();
    let reader = match relay.take() {
        Some(reader) => reader,
        None => install()?,
    };
    let cloned = reader.try_clone();
    *relay = Some(reader);
    Ok(cloned?)
}

fn install() -> std::io::Result<StdUnixStream> {
    let (reader, writer) = StdUnixStream::pair()?;
    reader.set_nonblocking(true)?;
    writer.set_nonblocking(true)?;
    // The handlers write here for the rest of the process's life
    let write_fd = writer.into_raw_fd();

    for &signum in FORWARDED_SIGNALS {
        let emulate_default = has_default_disposition(signum)?;
        // SAFETY: the action only calls write(2) and signal-hook's default
        // emulation, both async-signal-safe, and allocates nothing
        unsafe {
            signal_hook::low_level::register(signum, move || {
                relay_signal(write_fd, signum, emulate_default)
            })?;
        }
    }

    tracing::debug!(
        count = FORWARDED_SIGNALS.len(),
        "Installed signal forwarding handlers"
    );
    Ok(reader)
}

fn relay_signal(write_fd: RawFd, signum: i32, emulate_default: bool) {
    if FORWARDING.load(Ordering::SeqCst) {
        let byte = signum as u8;
        // SAFETY: one byte from a live local; a full socket drops the signal
        unsafe {
            libc::write(write_fd, (&byte as *const u8).cast(), 1);
        }
    } else if emulate_default {
        let _ = signal_hook::low_level::emulate_default_handler(signum);
    }
}

/// True if nothing has claimed `signum` yet.
fn has_default_disposition(signum: i32) -> std::io::Result<bool> {
    let mut current = std::mem::MaybeUninit::<libc::sigaction>::zeroed();
    // SAFETY: a null new action only queries the current one
    let rc = unsafe { libc::sigaction(signum, std::ptr::null(), current.as_mut_ptr()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: filled in by sigaction
    let current = unsafe { current.assume_init() };
    Ok(current.sa_sigaction == libc::SIG_DFL)
}

/// Discard signals queued for a session that already ended.
fn drain(reader: &mut StdUnixStream) -> std::io::Result<()> {
    let mut buf = [0u8; 64];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(_) => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}
