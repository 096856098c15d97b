#![allow(dead_code)]

use assert_cmd::Command;
use berth_test_utils::{FakeDaemon, FakeRuntime};
use std::time::Duration;

pub struct TestContext {
    pub cmd: Command,
    pub fake: FakeRuntime,
    pub daemon: FakeDaemon,
}

impl TestContext {
    /// A fresh command against the same daemon
    pub fn new_cmd(&self) -> Command {
        command(&self.daemon.address())
    }
}

/// `berth` with a clean environment and no `--address`, for tests that pass their own
pub fn bare_command() -> Command {
    let bin_path = env!("CARGO_BIN_EXE_berth");
    let mut cmd = Command::new(bin_path);
    // You can override this with .timeout(Duration::from_secs(N))
    cmd.timeout(Duration::from_secs(30));
    cmd.env_remove("BERTH_ADDRESS")
        .env_remove("BERTH_NAMESPACE")
        .env_remove("RUST_LOG");
    cmd
}

fn command(address: &str) -> Command {
    let mut cmd = bare_command();
    cmd.arg("--address").arg(address);
    cmd
}

/// `berth` pointed at a daemon serving `fake` in the default namespace
pub fn berth(fake: FakeRuntime) -> TestContext {
    let daemon = FakeDaemon::start([fake.clone()]).expect("Failed to start fake daemon");
    TestContext {
        cmd: command(&daemon.address()),
        fake,
        daemon,
    }
}

/// `berth` pointed at a socket nothing listens on
pub fn berth_unreachable() -> (Command, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let address = format!("unix://{}", dir.path().join("berth.sock").display());
    (command(&address), dir)
}
