mod cli;
mod commands;

use berth::BerthError;
use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.global.debug);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = match runtime.block_on(run(cli)) {
        Ok(()) => 0,
        Err(err) => report(&err),
    };

    // Exit without waiting on the blocking stdin reader
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Exec(args) => commands::exec::execute(args, &cli.global).await,
        Commands::Stop(args) => commands::stop::execute(args, &cli.global).await,
    }
}

/// Print `err` and pick the exit code.
///
/// A remote non-zero exit is the command's own outcome: no message, same code.
fn report(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<BerthError>() {
        Some(berth_err @ BerthError::ExecFailed { .. }) => berth_err.exit_code(),
        _ => {
            eprintln!("Error: {:#}", err);
            1
        }
    }
}

fn init_logging(debug: bool) {
    let env_filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
