//! IdGenerator port.
//!
//! Run ids end up in the lock file and checkpoints; worker ids tag every log
//! line of one external process.

use crate::domain::ids::{RunId, WorkerId};
use crate::ports::Clock;
use ulid::Ulid;

/// Produces run and worker ids.
///
/// # Thread Safety
/// - `Send + Sync`: one generator is shared by the whole pipeline
pub trait IdGenerator: Send + Sync {
    fn generate_run_id(&self) -> RunId;

    fn generate_worker_id(&self) -> WorkerId;
}

/// ULID generator whose timestamp part comes from a [`Clock`].
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    /// Ids sort by `clock`'s time; with a [`FixedClock`](crate::ports::FixedClock)
    /// only the random part differs.
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_run_id(&self) -> RunId {
        RunId::from(self.next_ulid())
    }

    fn generate_worker_id(&self) -> WorkerId {
        WorkerId::from(self.next_ulid())
    }
}
