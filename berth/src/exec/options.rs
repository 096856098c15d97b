//! Exec options.

use berth_shared::errors::{BerthError, BerthResult};
use std::path::PathBuf;

/// User options for starting a process in a running container.
///
/// # Examples
///
/// ```
/// use berth::exec::ExecOptions;
///
/// let options = ExecOptions::default()
///     .interactive(true)
///     .tty(true)
///     .env("RUST_LOG=debug")
///     .workdir("/srv");
/// assert!(options.validate().is_ok());
/// ```
#[derive(Clone, Debug, Default)]
pub struct ExecOptions {
    /// Attach local stdin.
    pub interactive: bool,
    /// Allocate a pseudo-terminal.
    pub tty: bool,
    /// Start and return without waiting.
    pub detach: bool,
    /// Working directory override.
    pub workdir: Option<String>,
    /// `KEY=VALUE` (or bare `KEY`) entries; highest precedence.
    pub env: Vec<String>,
    /// Env files; entries override the container's defaults.
    pub env_files: Vec<PathBuf>,
    /// Grant the extended capability set.
    pub privileged: bool,
    /// `user[:group]` as name or numeric id.
    pub user: Option<String>,
}

impl ExecOptions {
    pub fn interactive(mut self, enable: bool) -> Self {
        self.interactive = enable;
        self
    }

    pub fn tty(mut self, enable: bool) -> Self {
        self.tty = enable;
        self
    }

    pub fn detach(mut self, enable: bool) -> Self {
        self.detach = enable;
        self
    }

    pub fn workdir(mut self, dir: impl Into<String>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn env(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    pub fn env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_files.push(path.into());
        self
    }

    pub fn privileged(mut self, enable: bool) -> Self {
        self.privileged = enable;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Reject flag combinations the engine cannot honor.
    ///
    /// A detached process has no local session to read input from or to
    /// drive a terminal for.
    pub fn validate(&self) -> BerthResult<()> {
        if self.detach && self.interactive {
            return Err(BerthError::InvalidArgument(
                "currently flag -i and -d cannot be specified together".into(),
            ));
        }
        if self.detach && self.tty {
            return Err(BerthError::InvalidArgument(
                "currently flag -t and -d cannot be specified together".into(),
            ));
        }
        Ok(())
    }
}
