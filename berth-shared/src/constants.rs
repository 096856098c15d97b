//! Shared constants
//!
//! These constants must agree between berth and the runtime daemon it drives.

/// Runtime connection constants
pub mod runtime {
    /// Default runtime daemon address.
    pub const DEFAULT_ADDRESS: &str = "unix:///run/berth/berth.sock";

    /// Default namespace when none is configured.
    pub const DEFAULT_NAMESPACE: &str = "default";

    /// gRPC metadata header carrying the active namespace.
    pub const NAMESPACE_HEADER: &str = "berth-namespace";
}

/// Container label keys understood by berth
pub mod labels {
    /// Signal used to stop the container's primary process (e.g. "SIGINT" or "2").
    pub const STOP_SIGNAL: &str = "berth/stop-signal";
}

/// Exec constants
pub mod exec {
    /// Prefix of generated exec process identifiers.
    pub const ID_PREFIX: &str = "exec-";
}

/// Stop constants
pub mod stop {
    /// Grace period before the runtime escalates to SIGKILL.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

    /// Signal sent when the container carries no stop-signal label.
    pub const DEFAULT_SIGNAL: &str = "SIGTERM";
}
