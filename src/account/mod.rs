//! Account snapshots: immutable, fully-built-or-not-at-all views fused
//! from several exchange endpoints, each pre-indexed for O(1) lookup.

mod pm_snapshot;
mod snapshot;

pub use pm_snapshot::{build_pm_snapshot, build_pm_snapshot_arc, PmAccount, PmSnapshotBuilder};
pub use snapshot::{build_snapshot, build_snapshot_arc, Account, ClassicSnapshotBuilder};

use std::time::{SystemTime, UNIX_EPOCH};

/// Seam over wall-clock time so snapshot timestamps are freezable in
/// tests. The live clock is the only permitted direct use of
/// `SystemTime::now()` in the crate.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time went backwards")
            .as_millis() as i64
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrozenClock(pub i64);

impl Clock for FrozenClock {
    fn now_millis(&self) -> i64 {
        self.0
    }
}
