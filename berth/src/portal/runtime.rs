//! Container and task lookups against the runtime daemon.

use super::connection::Connection;
use super::process::GrpcTask;
use crate::runtime::{ContainerInfo, ContainerRecord, ContainerRuntime, Task};
use async_trait::async_trait;
use berth_shared::constants::runtime::NAMESPACE_HEADER;
use berth_shared::generated as pb;
use berth_shared::{BerthError, BerthResult, RuntimeClient, Transport};
use oci_spec::runtime::Spec;
use std::sync::Arc;
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::Channel;

/// Client handle scoped to one namespace.
#[derive(Clone)]
pub(crate) struct RuntimeChannel {
    client: RuntimeClient<Channel>,
    namespace: AsciiMetadataValue,
}

impl RuntimeChannel {
    pub(crate) fn client(&self) -> RuntimeClient<Channel> {
        self.client.clone()
    }

    /// Wrap `message` with the namespace header.
    pub(crate) fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        request
            .metadata_mut()
            .insert(NAMESPACE_HEADER, self.namespace.clone());
        request
    }
}

/// Runtime daemon reached over gRPC.
///
/// Connects lazily; one channel backs every call made through this handle
/// and the tasks and processes obtained from it.
pub struct GrpcRuntime {
    connection: Connection,
    namespace: String,
    header: AsciiMetadataValue,
}

impl GrpcRuntime {
    pub fn new(transport: Transport, namespace: impl Into<String>) -> BerthResult<Self> {
        let namespace = namespace.into();
        if namespace.is_empty() {
            return Err(BerthError::Config("namespace must not be empty".into()));
        }
        let header = AsciiMetadataValue::try_from(namespace.as_str())
            .map_err(|_| BerthError::Config(format!("invalid namespace {:?}", namespace)))?;

        Ok(Self {
            connection: Connection::new(transport),
            namespace,
            header,
        })
    }

    pub fn transport(&self) -> &Transport {
        self.connection.transport()
    }

    async fn channel(&self) -> BerthResult<RuntimeChannel> {
        let channel = self.connection.channel().await?;
        Ok(RuntimeChannel {
            client: RuntimeClient::new(channel),
            namespace: self.header.clone(),
        })
    }
}

#[async_trait]
impl ContainerRuntime for GrpcRuntime {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn list(&self) -> BerthResult<Vec<ContainerRecord>> {
        let channel = self.channel().await?;
        let response = channel
            .client()
            .list_containers(channel.request(pb::ListContainersRequest {}))
            .await?
            .into_inner();

        tracing::trace!(count = response.containers.len(), "Listed containers");
        Ok(response
            .containers
            .into_iter()
            .map(|record| ContainerRecord::new(record.id, record.name))
            .collect())
    }

    async fn spec(&self, container_id: &str) -> BerthResult<Spec> {
        let channel = self.channel().await?;
        let response = channel
            .client()
            .get_spec(channel.request(pb::GetSpecRequest {
                container_id: container_id.to_string(),
            }))
            .await?
            .into_inner();

        let spec = serde_json::from_slice(&response.spec_json)?;
        Ok(spec)
    }

    async fn info(&self, container_id: &str) -> BerthResult<ContainerInfo> {
        let channel = self.channel().await?;
        let response = channel
            .client()
            .get_container(channel.request(pb::GetContainerRequest {
                container_id: container_id.to_string(),
            }))
            .await?
            .into_inner();

        Ok(ContainerInfo {
            id: response.id,
            name: response.name,
            image: response.image,
            labels: response.labels.into_iter().collect(),
        })
    }

    async fn read_file(&self, container_id: &str, path: &str) -> BerthResult<Option<Vec<u8>>> {
        let channel = self.channel().await?;
        let response = channel
            .client()
            .read_file(channel.request(pb::ReadFileRequest {
                container_id: container_id.to_string(),
                path: path.to_string(),
            }))
            .await?
            .into_inner();

        Ok(response.found.then_some(response.data))
    }

    async fn task(&self, container_id: &str) -> BerthResult<Arc<dyn Task>> {
        let channel = self.channel().await?;
        let response = channel
            .client()
            .get_task(channel.request(pb::GetTaskRequest {
                container_id: container_id.to_string(),
            }))
            .await?
            .into_inner();

        Ok(Arc::new(GrpcTask::new(
            channel,
            container_id.to_string(),
            response.pid,
        )))
    }
}

// Compile-time assertion that GrpcRuntime can back concurrent operations
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<GrpcRuntime>;
};
