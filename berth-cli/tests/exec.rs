use berth_test_utils::{Call, ContainerFixture, ExecScript, FakeRuntime};
use predicates::prelude::*;
use rstest::rstest;
use std::io::Write;

mod common;

fn fake() -> FakeRuntime {
    FakeRuntime::new("default")
        .with_container(ContainerFixture::new("3f2a9c00d1").name("web1"))
        .with_container(ContainerFixture::new("ab12cd"))
        .with_container(ContainerFixture::new("ab34ef"))
}

#[test]
fn test_exec_prints_output() {
    let mut ctx = common::berth(fake().with_script(ExecScript::exit(0).stdout("hi\n")));
    ctx.cmd.args(["exec", "web1", "echo", "hi"]);
    ctx.cmd.assert().success().stdout("hi\n");
}

#[rstest]
#[case(1)]
#[case(3)]
#[case(42)]
fn test_exec_propagates_exit_code(#[case] code: u32) {
    let mut ctx = common::berth(fake().with_script(ExecScript::exit(code)));
    ctx.cmd.args(["exec", "web1", "sh", "-c", "exit"]);
    ctx.cmd
        .assert()
        .code(code as i32)
        .stderr(predicate::str::contains("Error").not());
}

#[test]
fn test_exec_wide_exit_code_still_fails() {
    let mut ctx = common::berth(fake().with_script(ExecScript::exit(256)));
    ctx.cmd.args(["exec", "web1", "sh", "-c", "exit"]);
    ctx.cmd.assert().code(255);
}

#[test]
fn test_exec_interactive_stdin() {
    let mut ctx = common::berth(fake().with_script(ExecScript::exit(0).echo_stdin()));
    ctx.cmd.args(["exec", "-i", "web1", "cat"]).write_stdin("ping\n");
    ctx.cmd.assert().success().stdout("ping\n");

    let closes = ctx
        .fake
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::CloseStdin(_)))
        .count();
    assert_eq!(closes, 1);
}

#[test]
fn test_exec_passes_flags_to_process() {
    let mut env_file = tempfile::NamedTempFile::new().unwrap();
    writeln!(env_file, "# comment\nFROM_FILE=1\nMODE=file").unwrap();

    let mut ctx = common::berth(fake());
    ctx.cmd.args(["exec", "-e", "MODE=flag", "-w", "/srv", "--env-file"]);
    ctx.cmd.arg(env_file.path());
    ctx.cmd.args(["web1", "ls", "-la"]);
    ctx.cmd.assert().success();

    let processes = ctx.fake.exec_processes();
    assert_eq!(processes.len(), 1);
    let process = &processes[0];
    assert_eq!(
        process.args().clone().unwrap(),
        vec!["ls".to_string(), "-la".to_string()]
    );
    assert_eq!(process.cwd().to_str(), Some("/srv"));

    let env = process.env().clone().unwrap();
    assert!(env.contains(&"FROM_FILE=1".to_string()));
    assert!(env.contains(&"MODE=flag".to_string()));
    assert!(!env.contains(&"MODE=file".to_string()));
}

#[test]
fn test_exec_detach_returns_immediately() {
    let mut ctx = common::berth(fake().with_script(ExecScript::exit(0).until_killed()));
    ctx.cmd.args(["exec", "-d", "web1", "sleep", "100"]);
    ctx.cmd.assert().success().stdout(predicate::str::is_empty());

    let calls = ctx.fake.calls();
    assert!(calls.iter().any(|c| matches!(c, Call::Start(_))));
    assert!(!calls.iter().any(|c| matches!(c, Call::Wait(_) | Call::Delete(_))));
}

#[test]
fn test_exec_unknown_container() {
    let mut ctx = common::berth(fake());
    ctx.cmd.args(["exec", "nope", "true"]);
    ctx.cmd
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no such container nope"));
}

#[test]
fn test_exec_ambiguous_prefix() {
    let mut ctx = common::berth(fake());
    ctx.cmd.args(["exec", "ab", "true"]);
    ctx.cmd.assert().failure().stderr(predicate::str::contains(
        "multiple IDs found with provided prefix: ab",
    ));
    assert!(ctx.fake.calls().is_empty());
}

#[test]
fn test_exec_tty_requires_terminal() {
    let mut ctx = common::berth(fake());
    ctx.cmd.args(["exec", "-t", "web1", "sh"]).write_stdin("");
    ctx.cmd
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a TTY"));
}

#[test]
fn test_exec_interactive_detach_conflict() {
    let mut ctx = common::berth(fake());
    ctx.cmd.args(["exec", "-i", "-d", "web1", "sh"]);
    ctx.cmd
        .assert()
        .failure()
        .stderr(predicate::str::contains("-i and -d"));
}

#[test]
fn test_exec_requires_command() {
    let mut ctx = common::berth(fake());
    ctx.cmd.args(["exec", "web1"]);
    ctx.cmd.assert().code(2);
}

#[test]
fn test_exec_unreachable_runtime() {
    let (mut cmd, _dir) = common::berth_unreachable();
    cmd.args(["exec", "web1", "true"]);
    cmd.assert()
        .code(1)
        .stderr(predicate::str::contains("failed to connect to runtime"));
}
