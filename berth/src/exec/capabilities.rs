//! Linux capabilities for privileged exec.
//!
//! A privileged exec receives the invoking process's effective capability
//! set in its bounding, effective, permitted and inheritable sets.

use berth_shared::errors::{BerthError, BerthResult};
use oci_spec::runtime::{Capability, LinuxCapabilities, Process};
use std::collections::HashSet;

const PROC_SELF_STATUS: &str = "/proc/self/status";

/// All 41 known Linux capabilities, indexed by kernel bit number.
pub const KNOWN_CAPABILITIES: [Capability; 41] = [
    // File operations (CAP 0-4)
    Capability::Chown,
    Capability::DacOverride,
    Capability::DacReadSearch,
    Capability::Fowner,
    Capability::Fsetid,
    // Process capabilities (CAP 5-9)
    Capability::Kill,
    Capability::Setgid,
    Capability::Setuid,
    Capability::Setpcap,
    Capability::LinuxImmutable,
    // Network capabilities (CAP 10-13)
    Capability::NetBindService,
    Capability::NetBroadcast,
    Capability::NetAdmin,
    Capability::NetRaw,
    // IPC capabilities (CAP 14-15)
    Capability::IpcLock,
    Capability::IpcOwner,
    // System operations (CAP 16-26)
    Capability::SysModule,
    Capability::SysRawio,
    Capability::SysChroot,
    Capability::SysPtrace,
    Capability::SysPacct,
    Capability::SysAdmin,
    Capability::SysBoot,
    Capability::SysNice,
    Capability::SysResource,
    Capability::SysTime,
    Capability::SysTtyConfig,
    // Device operations (CAP 27)
    Capability::Mknod,
    // File leases (CAP 28)
    Capability::Lease,
    // Audit capabilities (CAP 29-30)
    Capability::AuditWrite,
    Capability::AuditControl,
    // Filesystem capabilities (CAP 31)
    Capability::Setfcap,
    // MAC (CAP 32-33)
    Capability::MacOverride,
    Capability::MacAdmin,
    // Modern capabilities (CAP 34-40)
    Capability::Syslog,
    Capability::WakeAlarm,
    Capability::BlockSuspend,
    Capability::AuditRead,
    Capability::Perfmon,           // Linux 5.8+
    Capability::Bpf,               // Linux 5.8+
    Capability::CheckpointRestore, // Linux 5.9+
];

/// Capabilities whose bits are set in `mask`. Unknown bits are ignored.
pub fn from_mask(mask: u64) -> HashSet<Capability> {
    KNOWN_CAPABILITIES
        .iter()
        .enumerate()
        .filter(|(bit, _)| mask & (1u64 << bit) != 0)
        .map(|(_, cap)| *cap)
        .collect()
}

/// Extract the `CapEff` mask from `/proc/<pid>/status` content.
pub fn parse_effective_mask(status: &str) -> BerthResult<u64> {
    let value = status
        .lines()
        .find_map(|line| line.strip_prefix("CapEff:"))
        .ok_or_else(|| BerthError::Spec("CapEff not found in process status".into()))?;

    u64::from_str_radix(value.trim(), 16)
        .map_err(|e| BerthError::Spec(format!("invalid CapEff value '{}': {}", value.trim(), e)))
}

/// Effective capabilities of the current process.
pub fn current() -> BerthResult<HashSet<Capability>> {
    let status = std::fs::read_to_string(PROC_SELF_STATUS).map_err(|e| {
        BerthError::Spec(format!("failed to read {}: {}", PROC_SELF_STATUS, e))
    })?;
    Ok(from_mask(parse_effective_mask(&status)?))
}

/// Grant `caps` to `process`. Ambient capabilities are left as they are.
pub fn apply(process: &mut Process, caps: HashSet<Capability>) {
    let mut linux_caps = match process.capabilities() {
        Some(existing) => existing.clone(),
        None => {
            let mut empty = LinuxCapabilities::default();
            empty.set_ambient(None);
            empty
        }
    };

    linux_caps
        .set_bounding(Some(caps.clone()))
        .set_effective(Some(caps.clone()))
        .set_permitted(Some(caps.clone()))
        .set_inheritable(Some(caps));
    process.set_capabilities(Some(linux_caps));
}
