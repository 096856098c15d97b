//! Integration tests for exec: resolution, spec building and the
//! attach/lifecycle protocol against an in-memory runtime.

use berth::exec::{self, ExecOptions};
use berth::runtime::WindowSize;
use berth::{BerthError, Resolver};
use berth_test_utils::{Call, ContainerFixture, ExecScript, FakeRuntime, StdioProbe, fake_stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

// ============================================================================
// TEST FIXTURES
// ============================================================================

const WEB1_ID: &str = "3f2a9c00d1e5b7aa";

fn runtime() -> FakeRuntime {
    FakeRuntime::new("default")
        .with_container(ContainerFixture::new(WEB1_ID).name("web1"))
        .with_container(ContainerFixture::new("ab12cd"))
        .with_container(ContainerFixture::new("ab34ef"))
}

fn argv(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn empty_stdio() -> (exec::ExecStdio, StdioProbe) {
    fake_stdio(Box::new(tokio::io::empty()))
}

async fn run(
    rt: &FakeRuntime,
    args: &[&str],
    options: &ExecOptions,
) -> (Result<(), BerthError>, StdioProbe) {
    let (stdio, probe) = empty_stdio();
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        exec::exec(rt, &argv(args), options, stdio, CancellationToken::new()),
    )
    .await
    .expect("exec session hung");
    (result, probe)
}

/// Position of the first call matching `pred`.
fn position(calls: &[Call], pred: impl Fn(&Call) -> bool) -> usize {
    calls
        .iter()
        .position(pred)
        .unwrap_or_else(|| panic!("call not recorded in {:?}", calls))
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

// ============================================================================
// RESOLUTION
// ============================================================================

#[tokio::test]
async fn resolve_by_name_and_prefix() {
    let rt = runtime();
    let resolver = Resolver::new(&rt);

    let by_name = resolver.resolve_unique("web1").await.unwrap();
    assert_eq!(by_name.id, WEB1_ID);

    let by_prefix = resolver.resolve_unique("3f2a").await.unwrap();
    assert_eq!(by_prefix.id, WEB1_ID);
}

#[tokio::test]
async fn ambiguous_prefix_reports_count() {
    let rt = runtime();
    let resolution = Resolver::new(&rt).resolve("ab").await.unwrap();
    assert_eq!(resolution.count(), 2);

    let (result, _) = run(&rt, &["ab", "true"], &ExecOptions::default()).await;
    match result {
        Err(BerthError::AmbiguousReference { reference, count }) => {
            assert_eq!(reference, "ab");
            assert_eq!(count, 2);
        }
        other => panic!("expected ambiguity, got {:?}", other),
    }
    assert!(rt.calls().is_empty());
}

#[tokio::test]
async fn unknown_container_is_not_found() {
    let rt = runtime();
    let (result, _) = run(&rt, &["nope", "true"], &ExecOptions::default()).await;
    assert!(matches!(result, Err(BerthError::NoSuchContainer(r)) if r == "nope"));
    assert!(rt.calls().is_empty());
}

#[tokio::test]
async fn invalid_flags_rejected_before_enumeration() {
    let rt = runtime();
    let options = ExecOptions::default().interactive(true).detach(true);
    let (result, _) = run(&rt, &["web1", "sh"], &options).await;

    assert!(matches!(result, Err(BerthError::InvalidArgument(_))));
    assert_eq!(rt.list_count(), 0);
}

#[tokio::test]
async fn missing_command_rejected() {
    let rt = runtime();
    let (result, _) = run(&rt, &["web1"], &ExecOptions::default()).await;
    assert!(matches!(result, Err(BerthError::InvalidArgument(_))));
}

// ============================================================================
// PROCESS SPEC
// ============================================================================

#[tokio::test]
async fn spec_applies_args_env_workdir_and_user() {
    let rt = FakeRuntime::new("default").with_container(
        ContainerFixture::new(WEB1_ID)
            .name("web1")
            .file("/etc/passwd", "root:x:0:0::/root:/bin/sh\napp:x:1000:1000::/home/app:/bin/sh\n")
            .file("/etc/group", "root:x:0:\napp:x:1000:\nwheel:x:10:app\n"),
    );

    let options = ExecOptions::default()
        .env("MODE=debug")
        .workdir("/srv")
        .user("app");
    let (result, _) = run(&rt, &["web1", "env", "-0"], &options).await;
    result.unwrap();

    let processes = rt.exec_processes();
    assert_eq!(processes.len(), 1);
    let process = &processes[0];

    assert_eq!(process.args().as_deref(), Some(&argv(&["env", "-0"])[..]));
    assert_eq!(process.cwd().to_str(), Some("/srv"));
    assert_eq!(process.terminal(), Some(false));
    let env = process.env().clone().unwrap();
    assert!(env.iter().any(|e| e.starts_with("PATH=")));
    assert!(env.contains(&"MODE=debug".to_string()));

    assert_eq!(process.user().uid(), 1000);
    assert_eq!(process.user().gid(), 1000);
    assert_eq!(
        process.user().additional_gids().as_deref(),
        Some(&[1000u32, 10][..])
    );
}

#[tokio::test]
async fn unknown_user_aborts_before_exec() {
    let rt = runtime();
    let options = ExecOptions::default().user("ghost");
    let (result, _) = run(&rt, &["web1", "id"], &options).await;

    assert!(matches!(result, Err(BerthError::Identity(_))));
    assert!(rt.calls().is_empty());
}

#[tokio::test]
async fn container_without_process_template_fails() {
    let rt = FakeRuntime::new("default")
        .with_container(ContainerFixture::new("bare").without_process());
    let (result, _) = run(&rt, &["bare", "true"], &ExecOptions::default()).await;
    assert!(matches!(result, Err(BerthError::Spec(_))));
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[tokio::test]
async fn attached_exec_subscribes_before_start_and_deletes() {
    let rt = runtime().with_script(ExecScript::exit(0).stdout("hello\n").stderr("warn\n"));
    let (result, probe) = run(&rt, &["web1", "echo", "hello"], &ExecOptions::default()).await;
    result.unwrap();

    assert_eq!(probe.stdout.text(), "hello\n");
    assert_eq!(probe.stderr.text(), "warn\n");

    let calls = rt.calls();
    let wait = position(&calls, |c| matches!(c, Call::Wait(_)));
    let start = position(&calls, |c| matches!(c, Call::Start(_)));
    let delete = position(&calls, |c| matches!(c, Call::Delete(_)));
    assert!(wait < start, "wait must precede start: {:?}", calls);
    assert!(start < delete);
    assert!(matches!(
        &calls[0],
        Call::Exec { container_id, stdin: false, terminal: false, .. } if container_id == WEB1_ID
    ));
}

#[tokio::test]
async fn instant_exit_is_observed() {
    // Exits as soon as it is started
    let rt = runtime().with_script(ExecScript::exit(0));
    for _ in 0..20 {
        let (result, _) = run(&rt, &["web1", "true"], &ExecOptions::default()).await;
        result.unwrap();
    }
}

#[tokio::test]
async fn nonzero_exit_is_exec_failed() {
    let rt = runtime().with_script(ExecScript::exit(3));
    let (result, _) = run(&rt, &["web1", "false"], &ExecOptions::default()).await;

    let err = result.unwrap_err();
    assert!(matches!(err, BerthError::ExecFailed { code: 3 }));
    assert_eq!(err.exit_code(), 3);
    assert!(rt.calls().iter().any(|c| matches!(c, Call::Delete(_))));
}

#[tokio::test]
async fn exit_error_surfaces_as_runtime_error() {
    let rt = runtime().with_script(ExecScript::exit(0).exit_error("shim disconnected"));
    let (result, _) = run(&rt, &["web1", "true"], &ExecOptions::default()).await;
    assert!(matches!(result, Err(BerthError::Runtime(msg)) if msg.contains("shim")));
}

#[tokio::test]
async fn exec_without_task_is_not_found() {
    let rt = FakeRuntime::new("default")
        .with_container(ContainerFixture::new("idle").without_task());
    let (result, _) = run(&rt, &["idle", "true"], &ExecOptions::default()).await;
    assert!(matches!(result, Err(BerthError::NotFound(_))));
}

#[tokio::test]
async fn detached_exec_starts_without_waiting() {
    let rt = runtime().with_script(ExecScript::exit(0).until_killed());
    let options = ExecOptions::default().detach(true);
    let (result, _) = run(&rt, &["web1", "sleep", "100"], &options).await;
    result.unwrap();

    let calls = rt.calls();
    assert_eq!(calls.len(), 2, "{:?}", calls);
    assert!(matches!(calls[0], Call::Exec { .. }));
    assert!(matches!(calls[1], Call::Start(_)));
}

#[tokio::test]
async fn interactive_input_is_delivered_and_closed_once() {
    let rt = runtime().with_script(ExecScript::exit(0).echo_stdin());
    let (stdio, probe) = fake_stdio(Box::new(&b"ping\n"[..]));
    let options = ExecOptions::default().interactive(true);

    exec::exec(&rt, &argv(&["web1", "cat"]), &options, stdio, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(probe.stdout.text(), "ping\n");
    let calls = rt.calls();
    assert!(matches!(calls[0], Call::Exec { stdin: true, .. }));
    let closes = calls
        .iter()
        .filter(|c| matches!(c, Call::CloseStdin(_)))
        .count();
    assert_eq!(closes, 1);
}

// ============================================================================
// TERMINAL AND SIGNALS
// ============================================================================

#[tokio::test]
async fn tty_session_restores_terminal_and_pushes_initial_size() {
    let rt = runtime().with_script(ExecScript::exit(0));
    let options = ExecOptions::default().tty(true);
    let (result, probe) = run(&rt, &["web1", "sh"], &options).await;
    result.unwrap();

    assert_eq!(probe.console.raw_count(), 1);
    assert_eq!(probe.console.reset_count(), 1);
    assert!(!probe.console.is_raw());

    let calls = rt.calls();
    assert!(matches!(calls[0], Call::Exec { terminal: true, .. }));
    assert!(
        calls
            .iter()
            .any(|c| matches!(c, Call::Resize(_, size) if *size == WindowSize::new(24, 80)))
    );
    assert_eq!(rt.exec_processes()[0].terminal(), Some(true));
}

#[tokio::test]
async fn tty_resize_is_forwarded() {
    let rt = runtime().with_script(ExecScript::exit(0).echo_stdin());
    let (mut input, stdin) = tokio::io::duplex(64);
    let (stdio, probe) = fake_stdio(Box::new(stdin));
    let options = ExecOptions::default().interactive(true).tty(true);

    let session = {
        let rt = rt.clone();
        tokio::spawn(async move {
            exec::exec(&rt, &argv(&["web1", "sh"]), &options, stdio, CancellationToken::new())
                .await
        })
    };

    wait_until(|| probe.console.is_raw()).await;
    wait_until(|| rt.calls().iter().any(|c| matches!(c, Call::Start(_)))).await;
    probe.console.resize(WindowSize::new(50, 132));
    wait_until(|| {
        rt.calls()
            .iter()
            .any(|c| matches!(c, Call::Resize(_, size) if *size == WindowSize::new(50, 132)))
    })
    .await;

    input.write_all(b"exit\n").await.unwrap();
    drop(input);
    session.await.unwrap().unwrap();

    assert_eq!(probe.stdout.text(), "exit\n");
    assert!(!probe.console.is_raw());
}

#[tokio::test]
async fn signals_are_forwarded_and_handlers_released() {
    let rt = runtime().with_script(ExecScript::exit(0).until_killed());
    let (stdio, probe) = empty_stdio();

    let session = {
        let rt = rt.clone();
        tokio::spawn(async move {
            exec::exec(
                &rt,
                &argv(&["web1", "sleep", "100"]),
                &ExecOptions::default(),
                stdio,
                CancellationToken::new(),
            )
            .await
        })
    };

    wait_until(|| probe.signals.has_subscribers()).await;
    wait_until(|| rt.calls().iter().any(|c| matches!(c, Call::Start(_)))).await;
    assert_eq!(probe.signals.raise(libc::SIGINT), 1);

    let result = session.await.unwrap();
    assert!(matches!(result, Err(BerthError::ExecFailed { code: 130 })));
    assert!(
        rt.calls()
            .iter()
            .any(|c| matches!(c, Call::Kill(_, sig) if *sig == libc::SIGINT))
    );
    assert!(!probe.signals.has_subscribers());
}

#[tokio::test]
async fn cancellation_cleans_up() {
    let rt = runtime().with_script(ExecScript::exit(0).until_killed());
    let (stdio, probe) = empty_stdio();
    let cancel = CancellationToken::new();
    let options = ExecOptions::default().tty(true);

    let session = {
        let rt = rt.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            exec::exec(&rt, &argv(&["web1", "top"]), &options, stdio, cancel).await
        })
    };

    wait_until(|| rt.calls().iter().any(|c| matches!(c, Call::Start(_)))).await;
    assert!(probe.console.is_raw());
    cancel.cancel();

    let result = session.await.unwrap();
    assert!(matches!(result, Err(BerthError::Cancelled)));
    assert!(!probe.console.is_raw());
    assert_eq!(probe.console.reset_count(), 1);
    assert!(rt.calls().iter().any(|c| matches!(c, Call::Delete(_))));
}

#[tokio::test]
async fn concurrent_sessions_get_distinct_exec_ids() {
    let rt = runtime().with_script(ExecScript::exit(0));
    let opts_a = ExecOptions::default();
    let opts_b = ExecOptions::default();
    let a = run(&rt, &["web1", "true"], &opts_a);
    let b = run(&rt, &["web1", "true"], &opts_b);
    let ((ra, _), (rb, _)) = tokio::join!(a, b);
    ra.unwrap();
    rb.unwrap();

    let ids: Vec<_> = rt
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Exec { exec_id, .. } => Some(exec_id),
            _ => None,
        })
        .collect();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
    assert!(ids.iter().all(|id| id.starts_with("exec-")));
}

#[tokio::test]
async fn privileged_exec_grants_invoking_capabilities() {
    let rt = runtime();
    let expected = exec::capabilities::current().unwrap();

    let (result, _) = run(
        &rt,
        &["web1", "ip", "link"],
        &ExecOptions::default().privileged(true),
    )
    .await;
    result.unwrap();

    let processes = rt.exec_processes();
    assert_eq!(processes.len(), 1);
    let caps = processes[0]
        .capabilities()
        .clone()
        .expect("privileged exec sets capabilities");

    assert_eq!(caps.bounding().as_ref(), Some(&expected));
    assert_eq!(caps.effective().as_ref(), Some(&expected));
    assert_eq!(caps.permitted().as_ref(), Some(&expected));
    assert_eq!(caps.inheritable().as_ref(), Some(&expected));
}
