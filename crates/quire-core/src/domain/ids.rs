//! Strongly-typed identifiers.
//!
//! All ids are ULIDs wrapped in a phantom-typed `Id<T>`, so a `RunId` can never
//! be passed where a `WorkerId` is expected. ULIDs sort by creation time, which
//! keeps log lines and lock files readable in order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Number of trailing ULID characters used as a log correlation id.
const SHORT_LEN: usize = 6;

/// Marker trait for each id flavour.
pub trait IdMarker: Send + Sync + 'static {
    /// Display prefix, e.g. `"run-"`.
    fn prefix() -> &'static str;
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// Wraps an existing ULID.
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// The underlying ULID.
    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Short lowercase tag taken from the random tail of the ULID.
    ///
    /// Unique enough to tell concurrently running workers apart in a log.
    pub fn short(&self) -> String {
        let s = self.ulid.to_string();
        s[s.len() - SHORT_LEN..].to_ascii_lowercase()
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// One invocation of the orchestrator against a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Run {}

impl IdMarker for Run {
    fn prefix() -> &'static str {
        "run-"
    }
}

/// One external worker process bound to one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Worker {}

impl IdMarker for Worker {
    fn prefix() -> &'static str {
        "worker-"
    }
}

/// Identifies one invocation of `quire run`; stored in the lock and in
/// checkpoints.
pub type RunId = Id<Run>;

/// Identifies one external worker process; its [`Id::short`] form tags
/// every log line about that process.
pub type WorkerId = Id<Worker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_flavour_prefix() {
        let run = RunId::from_ulid(Ulid::new());
        let worker = WorkerId::from_ulid(Ulid::new());

        assert!(run.to_string().starts_with("run-"));
        assert!(worker.to_string().starts_with("worker-"));
        // let _: RunId = worker; // <- does not compile
    }

    #[test]
    fn short_id_is_tail_of_ulid() {
        let ulid = Ulid::new();
        let id = WorkerId::from_ulid(ulid);
        let short = id.short();

        assert_eq!(short.len(), SHORT_LEN);
        assert!(ulid.to_string().to_ascii_lowercase().ends_with(&short));
    }

    #[test]
    fn ids_roundtrip_through_json() {
        let run = RunId::from_ulid(Ulid::new());
        let json = serde_json::to_string(&run).unwrap();
        let back: RunId = serde_json::from_str(&json).unwrap();
        assert_eq!(run, back);
    }

    #[test]
    fn phantom_marker_is_free() {
        assert_eq!(std::mem::size_of::<WorkerId>(), std::mem::size_of::<Ulid>());
    }
}
