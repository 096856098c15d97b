//! gRPC runtime daemon serving [`FakeRuntime`]s over a Unix socket.
//!
//! Lets tests drive the real client stack (`GrpcRuntime`, the `berth`
//! binary) against scripted containers.

use crate::runtime::FakeRuntime;
use berth::runtime::{BoxedReader, ContainerRuntime, ExecId, ExecProcess, ExecStreams, WindowSize};
use berth_shared::constants::runtime::NAMESPACE_HEADER;
use berth_shared::generated as pb;
use berth_shared::{BerthError, Runtime, RuntimeServer, Transport};
use oci_spec::runtime::Process;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::{ReceiverStream, UnixListenerStream};
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Background daemon; stops serving when dropped.
pub struct FakeDaemon {
    socket_path: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
    _dir: tempfile::TempDir,
}

impl FakeDaemon {
    /// Serve `runtimes`, one per namespace.
    ///
    /// Requests for any other namespace see an empty runtime.
    pub fn start(runtimes: impl IntoIterator<Item = FakeRuntime>) -> io::Result<Self> {
        // Short path to stay under SUN_LEN
        let dir = tempfile::Builder::new().prefix("berth").tempdir_in("/tmp")?;
        let socket_path = dir.path().join("berth.sock");

        let listener = std::os::unix::net::UnixListener::bind(&socket_path)?;
        listener.set_nonblocking(true)?;

        let service = RuntimeService {
            runtimes: runtimes
                .into_iter()
                .map(|rt| (rt.namespace().to_string(), rt))
                .collect(),
            processes: Arc::new(Mutex::new(HashMap::new())),
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        std::thread::Builder::new()
            .name("fake-berth-daemon".into())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        eprintln!("fake daemon: failed to build runtime: {}", e);
                        return;
                    }
                };
                rt.block_on(async move {
                    let listener = match tokio::net::UnixListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(e) => {
                            eprintln!("fake daemon: failed to register listener: {}", e);
                            return;
                        }
                    };
                    let served = Server::builder()
                        .add_service(RuntimeServer::new(service))
                        .serve_with_incoming_shutdown(UnixListenerStream::new(listener), async {
                            let _ = shutdown_rx.await;
                        })
                        .await;
                    if let Err(e) = served {
                        eprintln!("fake daemon: server error: {}", e);
                    }
                });
            })?;

        Ok(Self {
            socket_path,
            shutdown: Some(shutdown_tx),
            _dir: dir,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Address in the form accepted by `--address`.
    pub fn address(&self) -> String {
        format!("unix://{}", self.socket_path.display())
    }

    pub fn transport(&self) -> Transport {
        Transport::unix(self.socket_path.clone())
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

struct ServedProcess {
    process: Arc<dyn ExecProcess>,
    stdin: tokio::sync::Mutex<Option<DuplexStream>>,
    output: Mutex<Option<(DuplexStream, DuplexStream)>>,
}

struct RuntimeService {
    runtimes: HashMap<String, FakeRuntime>,
    processes: Arc<Mutex<HashMap<String, Arc<ServedProcess>>>>,
}

fn to_status(err: BerthError) -> Status {
    match err {
        BerthError::NotFound(msg) => Status::not_found(msg),
        BerthError::InvalidArgument(msg) => Status::invalid_argument(msg),
        other => Status::internal(other.to_string()),
    }
}

impl RuntimeService {
    fn runtime_for<T>(&self, request: &Request<T>) -> Result<FakeRuntime, Status> {
        let namespace = request
            .metadata()
            .get(NAMESPACE_HEADER)
            .ok_or_else(|| Status::invalid_argument("missing namespace"))?
            .to_str()
            .map_err(|_| Status::invalid_argument("invalid namespace"))?;

        Ok(self
            .runtimes
            .get(namespace)
            .cloned()
            .unwrap_or_else(|| FakeRuntime::new(namespace)))
    }

    fn served(&self, exec_id: &str) -> Result<Arc<ServedProcess>, Status> {
        self.processes
            .lock()
            .get(exec_id)
            .cloned()
            .ok_or_else(|| Status::not_found(format!("process {}", exec_id)))
    }
}

#[tonic::async_trait]
impl Runtime for RuntimeService {
    type WaitStream = ReceiverStream<Result<pb::WaitEvent, Status>>;
    type AttachStream = ReceiverStream<Result<pb::ProcessOutput, Status>>;

    async fn list_containers(
        &self,
        request: Request<pb::ListContainersRequest>,
    ) -> Result<Response<pb::ListContainersResponse>, Status> {
        let runtime = self.runtime_for(&request)?;
        let containers = runtime
            .list()
            .await
            .map_err(to_status)?
            .into_iter()
            .map(|record| pb::ContainerRecord {
                id: record.id,
                name: record.name,
            })
            .collect();
        Ok(Response::new(pb::ListContainersResponse { containers }))
    }

    async fn get_container(
        &self,
        request: Request<pb::GetContainerRequest>,
    ) -> Result<Response<pb::GetContainerResponse>, Status> {
        let runtime = self.runtime_for(&request)?;
        let info = runtime
            .info(&request.into_inner().container_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::GetContainerResponse {
            id: info.id,
            name: info.name,
            image: info.image,
            labels: info.labels,
        }))
    }

    async fn get_spec(
        &self,
        request: Request<pb::GetSpecRequest>,
    ) -> Result<Response<pb::GetSpecResponse>, Status> {
        let runtime = self.runtime_for(&request)?;
        let spec = runtime
            .spec(&request.into_inner().container_id)
            .await
            .map_err(to_status)?;
        let spec_json = serde_json::to_vec(&spec).map_err(|e| Status::internal(e.to_string()))?;
        Ok(Response::new(pb::GetSpecResponse { spec_json }))
    }

    async fn read_file(
        &self,
        request: Request<pb::ReadFileRequest>,
    ) -> Result<Response<pb::ReadFileResponse>, Status> {
        let runtime = self.runtime_for(&request)?;
        let req = request.into_inner();
        let data = runtime
            .read_file(&req.container_id, &req.path)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::ReadFileResponse {
            found: data.is_some(),
            data: data.unwrap_or_default(),
        }))
    }

    async fn get_task(
        &self,
        request: Request<pb::GetTaskRequest>,
    ) -> Result<Response<pb::GetTaskResponse>, Status> {
        let runtime = self.runtime_for(&request)?;
        let task = runtime
            .task(&request.into_inner().container_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::GetTaskResponse { pid: task.pid() }))
    }

    async fn exec(
        &self,
        request: Request<pb::ExecRequest>,
    ) -> Result<Response<pb::ExecResponse>, Status> {
        let runtime = self.runtime_for(&request)?;
        let req = request.into_inner();
        let exec_id = ExecId::parse(&req.exec_id).map_err(to_status)?;
        let process: Process = serde_json::from_slice(&req.process_json)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let task = runtime.task(&req.container_id).await.map_err(to_status)?;

        let (stdin_local, stdin_remote) = if req.stdin {
            let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
            (Some(local), Some(Box::new(remote) as BoxedReader))
        } else {
            (None, None)
        };
        let (stdout_remote, stdout_local) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_remote, stderr_local) = tokio::io::duplex(PIPE_CAPACITY);

        let streams = ExecStreams::new(
            stdin_remote,
            Box::new(stdout_remote),
            Box::new(stderr_remote),
        )
        .with_terminal(req.terminal);
        let process = task
            .exec(&exec_id, process, streams)
            .await
            .map_err(to_status)?;

        self.processes.lock().insert(
            req.exec_id,
            Arc::new(ServedProcess {
                process,
                stdin: tokio::sync::Mutex::new(stdin_local),
                output: Mutex::new(Some((stdout_local, stderr_local))),
            }),
        );
        Ok(Response::new(pb::ExecResponse {}))
    }

    async fn start(
        &self,
        request: Request<pb::StartRequest>,
    ) -> Result<Response<pb::StartResponse>, Status> {
        let served = self.served(&request.into_inner().exec_id)?;
        let pid = served.process.start().await.map_err(to_status)?;
        Ok(Response::new(pb::StartResponse { pid }))
    }

    async fn wait(
        &self,
        request: Request<pb::WaitRequest>,
    ) -> Result<Response<Self::WaitStream>, Status> {
        let served = self.served(&request.into_inner().exec_id)?;
        let exit_rx = served.process.wait().await.map_err(to_status)?;

        let (tx, rx) = mpsc::channel(2);
        let _ = tx.send(Ok(pb::WaitEvent { status: None })).await;
        tokio::spawn(async move {
            let event = match exit_rx.await {
                Ok(status) => Ok(pb::WaitEvent {
                    status: Some(pb::ExitStatus {
                        exit_code: status.code,
                        exited_at: status
                            .exited_at
                            .map(|at| at.to_rfc3339())
                            .unwrap_or_default(),
                        error: status.error,
                    }),
                }),
                Err(_) => Err(Status::aborted("process deleted before exit")),
            };
            let _ = tx.send(event).await;
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn attach(
        &self,
        request: Request<pb::AttachRequest>,
    ) -> Result<Response<Self::AttachStream>, Status> {
        let served = self.served(&request.into_inner().exec_id)?;
        let (stdout, stderr) = served
            .output
            .lock()
            .take()
            .ok_or_else(|| Status::failed_precondition("already attached"))?;

        let (tx, rx) = mpsc::channel(16);
        for (mut reader, is_stdout) in [(stdout, true), (stderr, false)] {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                loop {
                    let n = match reader.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    let data = buf[..n].to_vec();
                    let event = if is_stdout {
                        pb::process_output::Event::Stdout(data)
                    } else {
                        pb::process_output::Event::Stderr(data)
                    };
                    let output = pb::ProcessOutput { event: Some(event) };
                    if tx.send(Ok(output)).await.is_err() {
                        break;
                    }
                }
            });
        }
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn send_input(
        &self,
        request: Request<Streaming<pb::ProcessInput>>,
    ) -> Result<Response<pb::SendInputResponse>, Status> {
        let mut inputs = request.into_inner();
        while let Some(input) = inputs.message().await? {
            let served = self.served(&input.exec_id)?;
            let mut stdin = served.stdin.lock().await;
            if let Some(writer) = stdin.as_mut() {
                writer
                    .write_all(&input.data)
                    .await
                    .map_err(|e| Status::internal(e.to_string()))?;
            }
        }
        Ok(Response::new(pb::SendInputResponse {}))
    }

    async fn close_input(
        &self,
        request: Request<pb::CloseInputRequest>,
    ) -> Result<Response<pb::CloseInputResponse>, Status> {
        let served = self.served(&request.into_inner().exec_id)?;
        // Dropping the writer delivers end-of-input to the process
        drop(served.stdin.lock().await.take());
        served.process.close_stdin().await.map_err(to_status)?;
        Ok(Response::new(pb::CloseInputResponse {}))
    }

    async fn kill(
        &self,
        request: Request<pb::KillRequest>,
    ) -> Result<Response<pb::KillResponse>, Status> {
        let req = request.into_inner();
        if req.exec_id.is_empty() {
            return Err(Status::unimplemented("signalling the primary process"));
        }
        let served = self.served(&req.exec_id)?;
        served.process.kill(req.signal).await.map_err(to_status)?;
        Ok(Response::new(pb::KillResponse {}))
    }

    async fn resize_pty(
        &self,
        request: Request<pb::ResizePtyRequest>,
    ) -> Result<Response<pb::ResizePtyResponse>, Status> {
        let req = request.into_inner();
        let served = self.served(&req.exec_id)?;
        let size = WindowSize::new(
            u16::try_from(req.rows).unwrap_or(u16::MAX),
            u16::try_from(req.cols).unwrap_or(u16::MAX),
        );
        served.process.resize(size).await.map_err(to_status)?;
        Ok(Response::new(pb::ResizePtyResponse {}))
    }

    async fn delete_process(
        &self,
        request: Request<pb::DeleteProcessRequest>,
    ) -> Result<Response<pb::DeleteProcessResponse>, Status> {
        let exec_id = request.into_inner().exec_id;
        let served = self.served(&exec_id)?;
        served.process.delete().await.map_err(to_status)?;
        self.processes.lock().remove(&exec_id);
        Ok(Response::new(pb::DeleteProcessResponse { exit_code: 0 }))
    }

    async fn stop_task(
        &self,
        request: Request<pb::StopTaskRequest>,
    ) -> Result<Response<pb::StopTaskResponse>, Status> {
        let runtime = self.runtime_for(&request)?;
        let req = request.into_inner();
        let task = runtime.task(&req.container_id).await.map_err(to_status)?;
        task.stop(req.signal, Duration::from_millis(req.timeout_ms))
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::StopTaskResponse {}))
    }
}
