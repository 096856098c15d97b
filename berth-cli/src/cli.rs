use berth::{GrpcRuntime, Transport};
use berth_shared::constants::runtime::{DEFAULT_ADDRESS, DEFAULT_NAMESPACE};
use clap::{Args, Parser, Subcommand};

use crate::commands::exec::ExecArgs;
use crate::commands::stop::StopArgs;

#[derive(Parser, Debug)]
#[command(
    name = "berth",
    version,
    about = "Run additional processes in, and stop, containers held by a berth runtime"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Runtime daemon address (unix:///path, /path or tcp://host:port)
    #[arg(long, global = true, env = "BERTH_ADDRESS", default_value = DEFAULT_ADDRESS)]
    pub address: String,

    /// Namespace all operations are scoped to
    #[arg(short, long, global = true, env = "BERTH_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

impl GlobalFlags {
    /// Client for the configured daemon and namespace (connects lazily).
    pub fn create_runtime(&self) -> anyhow::Result<GrpcRuntime> {
        let transport = Transport::from_uri(&self.address)
            .map_err(|e| anyhow::anyhow!("invalid --address: {}", e))?;
        tracing::debug!(address = %transport, namespace = %self.namespace, "Using runtime");
        Ok(GrpcRuntime::new(transport, self.namespace.clone())?)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command in a running container
    Exec(ExecArgs),

    /// Stop one or more running containers
    Stop(StopArgs),
}
