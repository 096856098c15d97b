//! Container reference resolution.
//!
//! Maps a user-typed reference (full ID, ID prefix or name) onto the
//! containers of the active namespace. Ambiguity is never resolved by
//! picking a candidate: the caller gets the match count and fails.

use crate::runtime::{ContainerRecord, ContainerRuntime};
use berth_shared::errors::{BerthError, BerthResult};

/// True if `reference` selects `record`.
///
/// A record matches when the reference is a non-empty prefix of its full ID
/// or equals its name. Both comparisons are case-sensitive and independent.
pub fn matches(record: &ContainerRecord, reference: &str) -> bool {
    if reference.is_empty() {
        return false;
    }
    record.id.starts_with(reference) || record.name.as_deref() == Some(reference)
}

/// All candidates matched by one reference.
#[derive(Clone, Debug)]
pub struct Resolution {
    reference: String,
    matches: Vec<ContainerRecord>,
}

impl Resolution {
    /// Match `reference` against an enumeration of candidates.
    pub fn from_candidates(reference: &str, candidates: Vec<ContainerRecord>) -> Self {
        let matches = candidates
            .into_iter()
            .filter(|record| matches(record, reference))
            .collect();
        Self {
            reference: reference.to_string(),
            matches,
        }
    }

    /// The reference as the user supplied it.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn count(&self) -> usize {
        self.matches.len()
    }

    pub fn matches(&self) -> &[ContainerRecord] {
        &self.matches
    }

    /// The single matching container.
    ///
    /// # Errors
    ///
    /// - `NoSuchContainer` when nothing matched
    /// - `AmbiguousReference` when more than one container matched
    pub fn into_unique(mut self) -> BerthResult<ContainerRecord> {
        match self.matches.len() {
            0 => Err(BerthError::NoSuchContainer(self.reference)),
            1 => Ok(self.matches.remove(0)),
            count => Err(BerthError::AmbiguousReference {
                reference: self.reference,
                count,
            }),
        }
    }
}

/// Resolves references against a live runtime enumeration.
pub struct Resolver<'a> {
    runtime: &'a dyn ContainerRuntime,
}

impl<'a> Resolver<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime) -> Self {
        Self { runtime }
    }

    /// Enumerate the runtime and collect every match for `reference`.
    pub async fn resolve(&self, reference: &str) -> BerthResult<Resolution> {
        let candidates = self.runtime.list().await?;
        let resolution = Resolution::from_candidates(reference, candidates);

        tracing::debug!(
            reference = %reference,
            namespace = %self.runtime.namespace(),
            matches = resolution.count(),
            "Resolved container reference"
        );
        Ok(resolution)
    }

    /// Resolve `reference` to exactly one container.
    pub async fn resolve_unique(&self, reference: &str) -> BerthResult<ContainerRecord> {
        self.resolve(reference).await?.into_unique()
    }
}
