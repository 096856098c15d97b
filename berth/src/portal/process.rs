//! Task and exec'd process handles.
//!
//! Output is copied by a pump attached before the process starts; input by a
//! pump feeding the client-streaming SendInput call. The exit status is
//! delivered only after the output pump has drained.

use super::runtime::RuntimeChannel;
use crate::runtime::{
    BoxedReader, BoxedWriter, ExecId, ExecProcess, ExecStreams, ExitReceiver, ExitStatus, Task,
    WindowSize,
};
use async_trait::async_trait;
use berth_shared::generated as pb;
use berth_shared::{BerthError, BerthResult};
use chrono::{DateTime, Utc};
use oci_spec::runtime::Process;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Streaming;

const STDIN_CHUNK_SIZE: usize = 32 * 1024;

/// Running task of one container.
pub struct GrpcTask {
    channel: RuntimeChannel,
    container_id: String,
    pid: u32,
}

impl GrpcTask {
    pub(crate) fn new(channel: RuntimeChannel, container_id: String, pid: u32) -> Self {
        Self {
            channel,
            container_id,
            pid,
        }
    }
}

#[async_trait]
impl Task for GrpcTask {
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
        let request = pb::ExecRequest {
            container_id: self.container_id.clone(),
            exec_id: exec_id.to_string(),
            process_json: serde_json::to_vec(&process)?,
            stdin: streams.stdin.is_some(),
            terminal: streams.terminal,
        };
        self.channel
            .client()
            .exec(self.channel.request(request))
            .await?;

        let ExecStreams {
            stdin,
            stdout,
            stderr,
            ..
        } = streams;

        // Attach before returning so no output produced after start is lost
        let output = self
            .channel
            .client()
            .attach(self.channel.request(pb::AttachRequest {
                container_id: self.container_id.clone(),
                exec_id: exec_id.to_string(),
            }))
            .await?
            .into_inner();
        tracing::debug!(exec_id = %exec_id, "Attach stream connected");

        let attach = ExecProtocol::spawn_attach(exec_id.clone(), output, stdout, stderr);
        let stdin_pump = stdin.map(|stdin| {
            ExecProtocol::spawn_stdin(
                self.channel.clone(),
                self.container_id.clone(),
                exec_id.clone(),
                stdin,
            )
        });

        Ok(Arc::new(GrpcProcess {
            channel: self.channel.clone(),
            container_id: self.container_id.clone(),
            exec_id: exec_id.clone(),
            attach: Mutex::new(Some(attach)),
            stdin_pump: Mutex::new(stdin_pump),
            stdin_closed: AtomicBool::new(false),
        }))
    }

    async fn stop(&self, signal: i32, timeout: Duration) -> BerthResult<()> {
        let request = pb::StopTaskRequest {
            container_id: self.container_id.clone(),
            signal,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        };
        self.channel
            .client()
            .stop_task(self.channel.request(request))
            .await?;
        Ok(())
    }
}

/// Exec'd process registered on a task.
pub struct GrpcProcess {
    channel: RuntimeChannel,
    container_id: String,
    exec_id: ExecId,
    attach: Mutex<Option<JoinHandle<()>>>,
    stdin_pump: Mutex<Option<JoinHandle<()>>>,
    stdin_closed: AtomicBool,
}

impl GrpcProcess {
    fn exec_id_string(&self) -> String {
        self.exec_id.to_string()
    }
}

#[async_trait]
impl ExecProcess for GrpcProcess {
    fn id(&self) -> &ExecId {
        &self.exec_id
    }

    async fn wait(&self) -> BerthResult<ExitReceiver> {
        let request = pb::WaitRequest {
            container_id: self.container_id.clone(),
            exec_id: self.exec_id_string(),
        };
        let mut events = self
            .channel
            .client()
            .wait(self.channel.request(request))
            .await?
            .into_inner();

        // The first event acknowledges the subscription
        let ack = events.message().await?.ok_or_else(|| {
            BerthError::Rpc("wait stream closed before acknowledgement".into())
        })?;

        let (tx, rx) = oneshot::channel();
        let attach = self.attach.lock().take();
        tokio::spawn(ExecProtocol::forward_exit(
            self.exec_id.clone(),
            ack.status,
            events,
            attach,
            tx,
        ));
        Ok(rx)
    }

    async fn start(&self) -> BerthResult<u32> {
        let response = self
            .channel
            .client()
            .start(self.channel.request(pb::StartRequest {
                container_id: self.container_id.clone(),
                exec_id: self.exec_id_string(),
            }))
            .await?
            .into_inner();
        Ok(response.pid)
    }

    async fn kill(&self, signal: i32) -> BerthResult<()> {
        self.channel
            .client()
            .kill(self.channel.request(pb::KillRequest {
                container_id: self.container_id.clone(),
                exec_id: self.exec_id_string(),
                signal,
            }))
            .await?;
        Ok(())
    }

    async fn resize(&self, size: WindowSize) -> BerthResult<()> {
        self.channel
            .client()
            .resize_pty(self.channel.request(pb::ResizePtyRequest {
                container_id: self.container_id.clone(),
                exec_id: self.exec_id_string(),
                rows: u32::from(size.rows),
                cols: u32::from(size.cols),
            }))
            .await?;
        Ok(())
    }

    async fn close_stdin(&self) -> BerthResult<()> {
        if self.stdin_closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Everything read so far must reach the process before the close
        let pump = self.stdin_pump.lock().take();
        if let Some(pump) = pump {
            let _ = pump.await;
        }

        self.channel
            .client()
            .close_input(self.channel.request(pb::CloseInputRequest {
                container_id: self.container_id.clone(),
                exec_id: self.exec_id_string(),
            }))
            .await?;
        tracing::debug!(exec_id = %self.exec_id, "Closed exec stdin");
        Ok(())
    }

    async fn delete(&self) -> BerthResult<()> {
        let response = self
            .channel
            .client()
            .delete_process(self.channel.request(pb::DeleteProcessRequest {
                container_id: self.container_id.clone(),
                exec_id: self.exec_id_string(),
            }))
            .await?
            .into_inner();
        tracing::debug!(
            exec_id = %self.exec_id,
            exit_code = response.exit_code,
            "Deleted exec process"
        );

        let attach = self.attach.lock().take();
        let stdin_pump = self.stdin_pump.lock().take();
        for pump in attach.into_iter().chain(stdin_pump) {
            pump.abort();
        }
        Ok(())
    }
}

// ============================================================================
// Helper: Protocol wiring
// ============================================================================

struct ExecProtocol;

impl ExecProtocol {
    fn map_exit_status(status: pb::ExitStatus) -> ExitStatus {
        ExitStatus {
            code: status.exit_code,
            exited_at: DateTime::parse_from_rfc3339(&status.exited_at)
                .ok()
                .map(|at| at.with_timezone(&Utc)),
            error: status.error.filter(|e| !e.is_empty()),
        }
    }

    async fn forward_exit(
        exec_id: ExecId,
        mut pending: Option<pb::ExitStatus>,
        mut events: Streaming<pb::WaitEvent>,
        attach: Option<JoinHandle<()>>,
        tx: oneshot::Sender<ExitStatus>,
    ) {
        let status = loop {
            if let Some(status) = pending.take() {
                break Self::map_exit_status(status);
            }
            match events.message().await {
                Ok(Some(event)) => pending = event.status,
                Ok(None) => break ExitStatus::failed("wait stream closed before exit status"),
                Err(e) => {
                    tracing::error!(exec_id = %exec_id, error = %e, "Wait failed");
                    break ExitStatus::failed(format!("wait failed: {}", e.message()));
                }
            }
        };

        // Report the exit only after buffered output is written
        if let Some(attach) = attach {
            let _ = attach.await;
        }

        tracing::debug!(exec_id = %exec_id, exit_code = status.code, "Exec process exited");
        let _ = tx.send(status);
    }

    fn spawn_attach(
        exec_id: ExecId,
        mut output: Streaming<pb::ProcessOutput>,
        mut stdout: BoxedWriter,
        mut stderr: BoxedWriter,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut message_count = 0u64;
            loop {
                match output.message().await {
                    Ok(Some(message)) => {
                        message_count += 1;
                        if let Err(e) = Self::route_output(message, &mut stdout, &mut stderr).await
                        {
                            tracing::debug!(
                                exec_id = %exec_id,
                                error = %e,
                                "Local output closed, detaching"
                            );
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(
                            exec_id = %exec_id,
                            error = %e,
                            message_count,
                            "Attach stream error, breaking"
                        );
                        break;
                    }
                }
            }
            let _ = stdout.flush().await;
            let _ = stderr.flush().await;
            tracing::debug!(exec_id = %exec_id, message_count, "Attach stream ended");
        })
    }

    async fn route_output(
        message: pb::ProcessOutput,
        stdout: &mut BoxedWriter,
        stderr: &mut BoxedWriter,
    ) -> std::io::Result<()> {
        match message.event {
            Some(pb::process_output::Event::Stdout(data)) => {
                tracing::trace!(bytes = data.len(), "Received exec stdout");
                stdout.write_all(&data).await?;
                stdout.flush().await
            }
            Some(pb::process_output::Event::Stderr(data)) => {
                tracing::trace!(bytes = data.len(), "Received exec stderr");
                stderr.write_all(&data).await?;
                stderr.flush().await
            }
            None => Ok(()),
        }
    }

    fn spawn_stdin(
        channel: RuntimeChannel,
        container_id: String,
        exec_id: ExecId,
        mut stdin: BoxedReader,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (tx, rx) = mpsc::channel::<pb::ProcessInput>(8);

            // Producer: forward local input into the tonic stream until EOF
            let producer_exec_id = exec_id.to_string();
            let producer = tokio::spawn(async move {
                let mut buf = vec![0u8; STDIN_CHUNK_SIZE];
                loop {
                    let n = match stdin.read(&mut buf).await {
                        Ok(0) => return,
                        Ok(n) => n,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to read local stdin");
                            return;
                        }
                    };
                    let message = pb::ProcessInput {
                        container_id: container_id.clone(),
                        exec_id: producer_exec_id.clone(),
                        data: buf[..n].to_vec(),
                    };
                    if tx.send(message).await.is_err() {
                        return;
                    }
                }
            });

            let request = channel.request(ReceiverStream::new(rx));
            if let Err(e) = channel.client().send_input(request).await {
                tracing::warn!(exec_id = %exec_id, error = %e, "SendInput failed");
                producer.abort();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_exit_status() {
        let status = ExecProtocol::map_exit_status(pb::ExitStatus {
            exit_code: 3,
            exited_at: "2024-05-01T10:00:00Z".into(),
            error: None,
        });
        assert_eq!(status.code, 3);
        assert!(status.exited_at.is_some());
        assert_eq!(status.result().unwrap(), 3);
    }

    #[test]
    fn test_map_exit_status_error_and_bad_timestamp() {
        let status = ExecProtocol::map_exit_status(pb::ExitStatus {
            exit_code: 0,
            exited_at: String::new(),
            error: Some("shim disconnected".into()),
        });
        assert!(status.exited_at.is_none());
        assert!(matches!(status.result(), Err(BerthError::Runtime(_))));

        let empty_error = ExecProtocol::map_exit_status(pb::ExitStatus {
            exit_code: 0,
            exited_at: String::new(),
            error: Some(String::new()),
        });
        assert!(empty_error.result().is_ok());
    }
}
