//! In-memory container runtime.
//!
//! Containers, their stored process templates and files are scripted up
//! front. Every task/process call is recorded in order so tests can assert
//! on the protocol a caller followed.

use async_trait::async_trait;
use berth::runtime::{
    ContainerInfo, ContainerRecord, ContainerRuntime, ExecId, ExecProcess, ExecStreams,
    ExitReceiver, ExitStatus, Task, WindowSize,
};
use berth_shared::{BerthError, BerthResult};
use oci_spec::runtime::{Process, ProcessBuilder, Spec};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

/// Task state of a scripted container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// No task was ever created.
    Absent,
    Running(u32),
    /// The task exists but its primary process is gone.
    Exited(u32),
}

/// A scripted container.
#[derive(Clone, Debug)]
pub struct ContainerFixture {
    pub id: String,
    pub name: Option<String>,
    pub image: String,
    pub labels: HashMap<String, String>,
    pub process: Option<Process>,
    pub files: HashMap<String, Vec<u8>>,
    pub task: TaskState,
}

impl ContainerFixture {
    /// Running container with a plain `sh` process template.
    pub fn new(id: impl Into<String>) -> Self {
        let process = ProcessBuilder::default()
            .args(vec!["sh".to_string()])
            .cwd("/")
            .env(vec![
                "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
            ])
            .terminal(false)
            .build()
            .expect("default process template");

        Self {
            id: id.into(),
            name: None,
            image: "docker.io/library/alpine:latest".to_string(),
            labels: HashMap::new(),
            process: Some(process),
            files: HashMap::new(),
            task: TaskState::Running(4242),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn file(mut self, path: impl Into<String>, content: impl AsRef<[u8]>) -> Self {
        self.files.insert(path.into(), content.as_ref().to_vec());
        self
    }

    pub fn process(mut self, process: Process) -> Self {
        self.process = Some(process);
        self
    }

    pub fn without_process(mut self) -> Self {
        self.process = None;
        self
    }

    pub fn without_task(mut self) -> Self {
        self.task = TaskState::Absent;
        self
    }

    pub fn exited(mut self) -> Self {
        if let TaskState::Running(pid) = self.task {
            self.task = TaskState::Exited(pid);
        }
        self
    }
}

/// What an exec'd process does once started.
#[derive(Clone, Debug, Default)]
pub struct ExecScript {
    pub exit_code: u32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Copy stdin to stdout until end-of-input before exiting.
    pub echo_stdin: bool,
    /// Run until a signal arrives, then exit with 128 + signal.
    pub until_killed: bool,
    /// Out-of-band error reported with the exit status.
    pub exit_error: Option<String>,
}

impl ExecScript {
    pub fn exit(code: u32) -> Self {
        Self {
            exit_code: code,
            ..Default::default()
        }
    }

    pub fn stdout(mut self, data: impl AsRef<[u8]>) -> Self {
        self.stdout = data.as_ref().to_vec();
        self
    }

    pub fn stderr(mut self, data: impl AsRef<[u8]>) -> Self {
        self.stderr = data.as_ref().to_vec();
        self
    }

    pub fn echo_stdin(mut self) -> Self {
        self.echo_stdin = true;
        self
    }

    pub fn until_killed(mut self) -> Self {
        self.until_killed = true;
        self
    }

    pub fn exit_error(mut self, error: impl Into<String>) -> Self {
        self.exit_error = Some(error.into());
        self
    }
}

/// One recorded task or process call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Exec {
        container_id: String,
        exec_id: String,
        stdin: bool,
        terminal: bool,
    },
    Wait(String),
    Start(String),
    Kill(String, i32),
    Resize(String, WindowSize),
    CloseStdin(String),
    Delete(String),
    Stop {
        container_id: String,
        signal: i32,
        timeout: Duration,
    },
}

#[derive(Default)]
struct State {
    containers: Vec<ContainerFixture>,
    script: ExecScript,
    calls: Vec<Call>,
    processes: Vec<Process>,
    list_count: usize,
}

/// In-memory [`ContainerRuntime`] for one namespace.
#[derive(Clone)]
pub struct FakeRuntime {
    namespace: String,
    state: Arc<Mutex<State>>,
    next_pid: Arc<AtomicU32>,
}

impl FakeRuntime {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            state: Arc::new(Mutex::new(State::default())),
            next_pid: Arc::new(AtomicU32::new(5000)),
        }
    }

    pub fn with_container(self, container: ContainerFixture) -> Self {
        self.add_container(container);
        self
    }

    pub fn with_script(self, script: ExecScript) -> Self {
        self.set_script(script);
        self
    }

    pub fn add_container(&self, container: ContainerFixture) {
        self.state.lock().containers.push(container);
    }

    pub fn set_script(&self, script: ExecScript) {
        self.state.lock().script = script;
    }

    /// Recorded task/process calls, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Process specs handed to `exec`, in order.
    pub fn exec_processes(&self) -> Vec<Process> {
        self.state.lock().processes.clone()
    }

    /// Number of enumerations performed.
    pub fn list_count(&self) -> usize {
        self.state.lock().list_count
    }

    pub fn task_state(&self, container_id: &str) -> Option<TaskState> {
        self.state
            .lock()
            .containers
            .iter()
            .find(|c| c.id == container_id)
            .map(|c| c.task)
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }

    fn container(&self, container_id: &str) -> BerthResult<ContainerFixture> {
        self.state
            .lock()
            .containers
            .iter()
            .find(|c| c.id == container_id)
            .cloned()
            .ok_or_else(|| BerthError::NotFound(format!("container {}", container_id)))
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn list(&self) -> BerthResult<Vec<ContainerRecord>> {
        let mut state = self.state.lock();
        state.list_count += 1;
        Ok(state
            .containers
            .iter()
            .map(|c| ContainerRecord::new(c.id.clone(), c.name.clone()))
            .collect())
    }

    async fn spec(&self, container_id: &str) -> BerthResult<Spec> {
        let container = self.container(container_id)?;
        let mut spec = Spec::default();
        spec.set_process(container.process);
        Ok(spec)
    }

    async fn info(&self, container_id: &str) -> BerthResult<ContainerInfo> {
        let container = self.container(container_id)?;
        Ok(ContainerInfo {
            id: container.id,
            name: container.name,
            image: container.image,
            labels: container.labels,
        })
    }

    async fn read_file(&self, container_id: &str, path: &str) -> BerthResult<Option<Vec<u8>>> {
        Ok(self.container(container_id)?.files.get(path).cloned())
    }

    async fn task(&self, container_id: &str) -> BerthResult<Arc<dyn Task>> {
        match self.container(container_id)?.task {
            TaskState::Absent => Err(BerthError::NotFound(format!(
                "no running task found for {}",
                container_id
            ))),
            TaskState::Running(pid) | TaskState::Exited(pid) => Ok(Arc::new(FakeTask {
                runtime: self.clone(),
                container_id: container_id.to_string(),
                pid,
            })),
        }
    }
}

/// Task handle of a scripted container.
pub struct FakeTask {
    runtime: FakeRuntime,
    container_id: String,
    pid: u32,
}

#[async_trait]
impl Task for FakeTask {
    fn container_id(&self) -> &str {
        &self.container_id
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    async fn exec(
        &self,
        exec_id: &ExecId,
        process: Process,
        streams: ExecStreams,
    ) -> BerthResult<Arc<dyn ExecProcess>> {
        let script = {
            let mut state = self.runtime.state.lock();
            state.calls.push(Call::Exec {
                container_id: self.container_id.clone(),
                exec_id: exec_id.to_string(),
                stdin: streams.stdin.is_some(),
                terminal: streams.terminal,
            });
            state.processes.push(process);
            state.script.clone()
        };

        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        Ok(Arc::new(FakeProcess {
            inner: Arc::new(ProcessInner {
                runtime: self.runtime.clone(),
                exec_id: exec_id.clone(),
                script,
                streams: Mutex::new(Some(streams)),
                waiters: Mutex::new(Vec::new()),
                kill_tx,
                kill_rx: Mutex::new(Some(kill_rx)),
                stdin_closed: AtomicBool::new(false),
            }),
        }))
    }

    async fn stop(&self, signal: i32, timeout: Duration) -> BerthResult<()> {
        let mut state = self.runtime.state.lock();
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == self.container_id)
            .ok_or_else(|| BerthError::NotFound(format!("container {}", self.container_id)))?;

        match container.task {
            TaskState::Running(pid) => {
                container.task = TaskState::Exited(pid);
                state.calls.push(Call::Stop {
                    container_id: self.container_id.clone(),
                    signal,
                    timeout,
                });
                Ok(())
            }
            _ => Err(BerthError::NotFound(format!(
                "process already finished: {}",
                self.container_id
            ))),
        }
    }
}

struct ProcessInner {
    runtime: FakeRuntime,
    exec_id: ExecId,
    script: ExecScript,
    streams: Mutex<Option<ExecStreams>>,
    waiters: Mutex<Vec<oneshot::Sender<ExitStatus>>>,
    kill_tx: mpsc::UnboundedSender<i32>,
    kill_rx: Mutex<Option<mpsc::UnboundedReceiver<i32>>>,
    stdin_closed: AtomicBool,
}

impl ProcessInner {
    /// Run the script and report the exit to whoever is subscribed now.
    async fn run(self: Arc<Self>, streams: ExecStreams) {
        let ExecStreams {
            stdin,
            mut stdout,
            mut stderr,
            ..
        } = streams;

        let _ = stdout.write_all(&self.script.stdout).await;
        let _ = stderr.write_all(&self.script.stderr).await;

        if self.script.echo_stdin
            && let Some(mut stdin) = stdin
        {
            let _ = tokio::io::copy(&mut stdin, &mut stdout).await;
        }

        let kill_rx = self.kill_rx.lock().take();
        let code = match (self.script.until_killed, kill_rx) {
            (true, Some(mut kill_rx)) => match kill_rx.recv().await {
                Some(signal) => 128 + signal.unsigned_abs(),
                None => self.script.exit_code,
            },
            _ => self.script.exit_code,
        };

        let _ = stdout.flush().await;
        let _ = stderr.flush().await;
        drop(stdout);
        drop(stderr);

        let mut status = ExitStatus::exited(code);
        status.error = self.script.exit_error.clone();

        let waiters: Vec<_> = self.waiters.lock().drain(..).collect();
        for waiter in waiters {
            let _ = waiter.send(status.clone());
        }
    }
}

/// Exec'd process running a [`ExecScript`].
pub struct FakeProcess {
    inner: Arc<ProcessInner>,
}

#[async_trait]
impl ExecProcess for FakeProcess {
    fn id(&self) -> &ExecId {
        &self.inner.exec_id
    }

    async fn wait(&self) -> BerthResult<ExitReceiver> {
        self.inner
            .runtime
            .record(Call::Wait(self.inner.exec_id.to_string()));
        let (tx, rx) = oneshot::channel();
        self.inner.waiters.lock().push(tx);
        Ok(rx)
    }

    async fn start(&self) -> BerthResult<u32> {
        self.inner
            .runtime
            .record(Call::Start(self.inner.exec_id.to_string()));
        let streams = self.inner.streams.lock().take().ok_or_else(|| {
            BerthError::InvalidArgument(format!("{} already started", self.inner.exec_id))
        })?;
        tokio::spawn(Arc::clone(&self.inner).run(streams));
        Ok(self.inner.runtime.next_pid.fetch_add(1, Ordering::SeqCst))
    }

    async fn kill(&self, signal: i32) -> BerthResult<()> {
        self.inner
            .runtime
            .record(Call::Kill(self.inner.exec_id.to_string(), signal));
        let _ = self.inner.kill_tx.send(signal);
        Ok(())
    }

    async fn resize(&self, size: WindowSize) -> BerthResult<()> {
        self.inner
            .runtime
            .record(Call::Resize(self.inner.exec_id.to_string(), size));
        Ok(())
    }

    async fn close_stdin(&self) -> BerthResult<()> {
        if !self.inner.stdin_closed.swap(true, Ordering::SeqCst) {
            self.inner
                .runtime
                .record(Call::CloseStdin(self.inner.exec_id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self) -> BerthResult<()> {
        self.inner
            .runtime
            .record(Call::Delete(self.inner.exec_id.to_string()));
        Ok(())
    }
}
