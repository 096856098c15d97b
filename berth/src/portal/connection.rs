//! Channel to the runtime daemon.
//!
//! Nothing is dialled until the first RPC. The channel is then cached and
//! shared by every clone, so concurrent exec and stop calls multiplex over
//! one connection.

use berth_shared::{BerthError, BerthResult, Transport};
use hyper_util::rt::TokioIo;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UnixStream;
use tokio::sync::OnceCell;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

/// HTTP/2 authority sent over Unix sockets. The daemon never inspects it.
const UNIX_AUTHORITY: &str = "http://berth.local";

#[derive(Clone)]
pub struct Connection {
    transport: Transport,
    channel: Arc<OnceCell<Channel>>,
}

impl Connection {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            channel: Arc::new(OnceCell::new()),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// The shared channel, dialling the daemon on first use.
    ///
    /// A failed dial is not cached; the next call tries again.
    pub async fn channel(&self) -> BerthResult<Channel> {
        let channel = self
            .channel
            .get_or_try_init(|| self.dial())
            .await?;
        Ok(channel.clone())
    }

    async fn dial(&self) -> BerthResult<Channel> {
        tracing::debug!(address = %self.transport, "Dialling runtime daemon");
        let endpoint = match &self.transport {
            Transport::Unix { socket_path } => unix_endpoint(socket_path.clone()).await,
            Transport::Tcp { host, port } => tcp_endpoint(host, *port).await,
        };

        endpoint.map_err(|e| {
            BerthError::Transport(format!(
                "failed to connect to runtime at {}: {}",
                self.transport, e
            ))
        })
    }
}

async fn unix_endpoint(socket_path: PathBuf) -> BerthResult<Channel> {
    let connector = service_fn(move |_: Uri| {
        let socket_path = socket_path.clone();
        async move { UnixStream::connect(socket_path).await.map(TokioIo::new) }
    });
    Ok(Endpoint::from_static(UNIX_AUTHORITY)
        .connect_with_connector(connector)
        .await?)
}

async fn tcp_endpoint(host: &str, port: u16) -> BerthResult<Channel> {
    let endpoint = Endpoint::try_from(format!("http://{}:{}", host, port))?;
    Ok(endpoint.connect().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_socket_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let connection = Connection::new(Transport::unix(dir.path().join("absent.sock")));

        let err = connection.channel().await.unwrap_err();
        assert!(matches!(err, BerthError::Transport(_)));
        assert!(err.to_string().contains("absent.sock"));
    }

    #[tokio::test]
    async fn test_failed_dial_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let connection = Connection::new(Transport::unix(dir.path().join("late.sock")));

        assert!(connection.channel().await.is_err());
        assert!(!connection.channel.initialized());
        assert!(connection.channel().await.is_err());
    }
}
