//! Clock port.
//!
//! Checkpoints and lock files carry wall-clock timestamps; tests pin them with
//! [`FixedClock`].

use chrono::{DateTime, Utc};

/// Source of wall-clock time.
///
/// # Implementations
/// - **SystemClock**: `Utc::now()`
/// - **FixedClock**: always the same instant, for tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    at: DateTime<Utc>,
}

impl FixedClock {
    /// A clock stopped at `at`.
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { at }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.at
    }
}
