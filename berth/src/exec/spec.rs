//! Process specification for an exec'd command.
//!
//! The container's stored process spec is the template. User options are
//! applied as an ordered list of failable steps; nothing is handed to the
//! engine unless every step succeeds.

use super::options::ExecOptions;
use super::{capabilities, env, user};
use crate::runtime::ContainerRuntime;
use berth_shared::errors::{BerthError, BerthResult};
use oci_spec::runtime::Process;
use std::path::PathBuf;

/// Build the process spec for running `args` in `container_id`.
///
/// `args` is the command vector (the container reference already removed).
pub async fn build_exec_process(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    args: &[String],
    options: &ExecOptions,
) -> BerthResult<Process> {
    let spec = runtime.spec(container_id).await?;
    let mut process = spec.process().clone().ok_or_else(|| {
        BerthError::Spec(format!("container {} has no process spec", container_id))
    })?;

    if let Some(user_spec) = options.user.as_deref() {
        let info = runtime.info(container_id).await?;
        tracing::debug!(
            container_id = %info.id,
            image = %info.image,
            user = %user_spec,
            "Applying exec user override"
        );
        let identity = user::resolve_in_container(runtime, &info.id, user_spec).await?;
        apply_identity(&mut process, &identity);
    }

    let overrides = env::merge_env_file_and_flags(&options.env_files, &options.env, |key| {
        std::env::var(key).ok()
    })?;
    apply_options(&mut process, args, options, &overrides)?;

    if options.privileged {
        capabilities::apply(&mut process, capabilities::current()?);
    }

    tracing::trace!(
        container_id = %container_id,
        args = ?process.args(),
        cwd = %process.cwd().display(),
        terminal = ?process.terminal(),
        "Built exec process spec"
    );
    Ok(process)
}

/// Apply terminal, args, working directory and environment overrides.
pub fn apply_options(
    process: &mut Process,
    args: &[String],
    options: &ExecOptions,
    env_overrides: &[String],
) -> BerthResult<()> {
    if args.is_empty() {
        return Err(BerthError::InvalidArgument(
            "exec requires a command to run".into(),
        ));
    }

    process.set_terminal(Some(options.tty));
    process.set_args(Some(args.to_vec()));

    if let Some(workdir) = options.workdir.as_deref().filter(|w| !w.is_empty()) {
        process.set_cwd(PathBuf::from(workdir));
    }

    let template = process.env().clone().unwrap_or_default();
    process.set_env(Some(env::replace_or_append(&template, env_overrides)));
    Ok(())
}

fn apply_identity(process: &mut Process, identity: &user::Identity) {
    let mut process_user = process.user().clone();
    process_user
        .set_uid(identity.uid)
        .set_gid(identity.gid)
        .set_additional_gids(Some(identity.additional_gids.clone()));
    process.set_user(process_user);
}

#[cfg(test)]
mod tests {
    use super::*;
    use oci_spec::runtime::ProcessBuilder;

    fn template() -> Process {
        ProcessBuilder::default()
            .args(vec!["nginx".to_string(), "-g".to_string()])
            .cwd("/usr/share/nginx")
            .env(vec!["PATH=/usr/bin".to_string(), "MODE=prod".to_string()])
            .terminal(false)
            .build()
            .unwrap()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_args_and_terminal_overwritten() {
        let mut process = template();
        let options = ExecOptions::default().tty(true);
        apply_options(&mut process, &strings(&["sh", "-c", "ls"]), &options, &[]).unwrap();

        assert_eq!(process.args().as_deref(), Some(&strings(&["sh", "-c", "ls"])[..]));
        assert_eq!(process.terminal(), Some(true));
        assert_eq!(process.cwd(), &PathBuf::from("/usr/share/nginx"));
    }

    #[test]
    fn test_workdir_only_when_supplied() {
        let mut process = template();
        let options = ExecOptions::default().workdir("/tmp");
        apply_options(&mut process, &strings(&["pwd"]), &options, &[]).unwrap();
        assert_eq!(process.cwd(), &PathBuf::from("/tmp"));
    }

    #[test]
    fn test_env_overrides_template() {
        let mut process = template();
        apply_options(
            &mut process,
            &strings(&["env"]),
            &ExecOptions::default(),
            &strings(&["MODE=debug", "EXTRA=1"]),
        )
        .unwrap();
        assert_eq!(
            process.env().clone().unwrap(),
            strings(&["PATH=/usr/bin", "MODE=debug", "EXTRA=1"])
        );
    }

    #[test]
    fn test_empty_command_rejected() {
        let mut process = template();
        let err = apply_options(&mut process, &[], &ExecOptions::default(), &[]).unwrap_err();
        assert!(matches!(err, BerthError::InvalidArgument(_)));
    }

    #[test]
    fn test_identity_applied() {
        let mut process = template();
        apply_identity(
            &mut process,
            &user::Identity {
                uid: 1000,
                gid: 1000,
                additional_gids: vec![1000, 998],
            },
        );
        assert_eq!(process.user().uid(), 1000);
        assert_eq!(process.user().gid(), 1000);
        assert_eq!(
            process.user().additional_gids().as_deref(),
            Some(&[1000u32, 998][..])
        );
    }
}
