use berth::StopOptions;
use berth_shared::constants::stop::DEFAULT_TIMEOUT_SECS;
use clap::Args;
use std::time::Duration;

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Seconds to wait before the runtime kills the container
    #[arg(short = 't', long = "time", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub time: u64,

    /// Name, ID or ID prefix of the container(s) to stop
    #[arg(required = true, num_args = 1..)]
    pub containers: Vec<String>,
}

pub async fn execute(args: StopArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    let options = StopOptions::default().timeout(Duration::from_secs(args.time));

    berth::stop(
        &runtime,
        &args.containers,
        &options,
        &mut std::io::stdout(),
        &mut std::io::stderr(),
    )
    .await?;
    Ok(())
}
