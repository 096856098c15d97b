//! Core data types exchanged with the container runtime.

use berth_shared::constants::exec as exec_const;
use berth_shared::errors::{BerthError, BerthResult};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

/// A runtime-held container as seen by the resolver.
///
/// Produced by enumerating the active namespace; discarded after resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Full container identifier.
    pub id: String,

    /// Assigned name, if any.
    pub name: Option<String>,
}

impl ContainerRecord {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }
}

/// Descriptive record of a container.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: Option<String>,
    pub image: String,
    pub labels: HashMap<String, String>,
}

/// Identifier of an exec'd process.
///
/// `exec-` followed by 64 lowercase hex characters. Unique per container
/// while the process is outstanding.
///
/// # Example
///
/// ```
/// use berth::runtime::ExecId;
///
/// let id = ExecId::new();
/// assert!(id.as_str().starts_with("exec-"));
/// assert_eq!(id.as_str().len(), 5 + 64);
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecId(String);

impl ExecId {
    /// Number of hex characters after the prefix.
    pub const RANDOM_LENGTH: usize = 64;

    /// Generate a new random exec ID.
    ///
    /// Uses SHA256 of 32 random bytes to produce the hex suffix.
    pub fn new() -> Self {
        let mut random_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut random_bytes);

        let mut hasher = Sha256::new();
        hasher.update(random_bytes);
        let result = hasher.finalize();

        Self(format!("{}{}", exec_const::ID_PREFIX, hex::encode(result)))
    }

    /// Parse an ID received from the runtime.
    pub fn parse(value: &str) -> BerthResult<Self> {
        let valid = value
            .strip_prefix(exec_const::ID_PREFIX)
            .is_some_and(|suffix| {
                suffix.len() == Self::RANDOM_LENGTH
                    && suffix
                        .bytes()
                        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
            });
        if !valid {
            return Err(BerthError::InvalidArgument(format!(
                "invalid exec id {:?}",
                value
            )));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ExecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short_end = exec_const::ID_PREFIX.len() + 12;
        write!(f, "ExecId({})", &self.0[..short_end.min(self.0.len())])
    }
}

impl AsRef<str> for ExecId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Exit code reported when the real one could not be observed.
pub const UNKNOWN_EXIT_CODE: u32 = 255;

/// Exit status reported by the runtime for a finished process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExitStatus {
    /// Numeric exit code.
    pub code: u32,

    /// When the process exited, if the runtime reported it.
    pub exited_at: Option<DateTime<Utc>>,

    /// Out-of-band error reported alongside the code.
    pub error: Option<String>,
}

impl ExitStatus {
    /// Status for a process that exited with `code` and no error.
    pub fn exited(code: u32) -> Self {
        Self {
            code,
            exited_at: Some(Utc::now()),
            error: None,
        }
    }

    /// Status for a process whose exit could not be observed.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            code: UNKNOWN_EXIT_CODE,
            exited_at: None,
            error: Some(error.into()),
        }
    }

    /// The exit code, or the error the runtime reported with it.
    pub fn result(&self) -> BerthResult<u32> {
        match &self.error {
            Some(err) => Err(BerthError::Runtime(err.clone())),
            None => Ok(self.code),
        }
    }
}

/// Terminal window size in character cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
}

impl WindowSize {
    pub const fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(24, 80)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_ids_are_unique_hex() {
        let a = ExecId::new();
        let b = ExecId::new();
        assert_ne!(a, b);

        let suffix = a.as_str().strip_prefix("exec-").unwrap();
        assert_eq!(suffix.len(), ExecId::RANDOM_LENGTH);
        assert!(
            suffix
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_uppercase())
        );
    }

    #[test]
    fn test_exec_id_parse() {
        let id = ExecId::new();
        assert_eq!(ExecId::parse(id.as_str()).unwrap(), id);
        assert!(ExecId::parse("exec-").is_err());
        assert!(ExecId::parse(&id.as_str().to_uppercase()).is_err());
        assert!(ExecId::parse(id.as_str().trim_start_matches("exec-")).is_err());
    }

    #[test]
    fn test_exec_id_debug_is_short() {
        let id = ExecId::new();
        let debug = format!("{:?}", id);
        assert!(debug.starts_with("ExecId(exec-"));
        assert_eq!(debug.len(), "ExecId(".len() + 5 + 12 + 1);
    }

    #[test]
    fn test_exit_status_result() {
        assert_eq!(ExitStatus::exited(0).result().unwrap(), 0);
        assert_eq!(ExitStatus::exited(3).result().unwrap(), 3);

        let status = ExitStatus {
            code: 0,
            exited_at: None,
            error: Some("shim died".into()),
        };
        let err = status.result().unwrap_err();
        assert!(matches!(err, BerthError::Runtime(_)));
        assert!(err.to_string().contains("shim died"));

        let lost = ExitStatus::failed("wait stream closed");
        assert_eq!(lost.code, UNKNOWN_EXIT_CODE);
        assert!(lost.result().is_err());
    }
}
