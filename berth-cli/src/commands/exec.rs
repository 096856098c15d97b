use berth::exec::{ExecOptions, ExecStdio, HostConsole};
use clap::Args;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Keep STDIN open
    #[arg(short, long)]
    pub interactive: bool,

    /// Allocate a pseudo-TTY
    #[arg(short, long)]
    pub tty: bool,

    /// Run the command in the background
    #[arg(short, long)]
    pub detach: bool,

    /// Working directory inside the container
    #[arg(short, long)]
    pub workdir: Option<String>,

    /// Set environment variables (KEY=VALUE, or KEY to take the host value)
    #[arg(short, long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Read environment variables from a file
    #[arg(long = "env-file", value_name = "PATH")]
    pub env_file: Vec<PathBuf>,

    /// Give extended privileges to the command
    #[arg(long)]
    pub privileged: bool,

    /// Username or UID (format: <name|uid>[:<group|gid>])
    #[arg(short, long)]
    pub user: Option<String>,

    /// Name, ID or ID prefix of the container
    pub container: String,

    /// Command to run, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl ExecArgs {
    fn to_options(&self) -> ExecOptions {
        ExecOptions {
            interactive: self.interactive,
            tty: self.tty,
            detach: self.detach,
            workdir: self.workdir.clone(),
            env: self.env.clone(),
            env_files: self.env_file.clone(),
            privileged: self.privileged,
            user: self.user.clone(),
        }
    }
}

pub async fn execute(args: ExecArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let options = args.to_options();
    options.validate()?;
    if options.tty && !HostConsole::is_terminal() {
        anyhow::bail!("the input device is not a TTY");
    }

    let runtime = global.create_runtime()?;

    let mut argv = Vec::with_capacity(args.command.len() + 1);
    argv.push(args.container);
    argv.extend(args.command);

    berth::exec(
        &runtime,
        &argv,
        &options,
        ExecStdio::host(),
        CancellationToken::new(),
    )
    .await?;
    Ok(())
}
