//! Execution engine — sequential step runner with suspend and resume
//!
//! One run executes on one logical thread of control: steps never
//! overlap within a run, results append in step order, and the engine is
//! the only writer while a run is in flight. Distinct runs share nothing
//! and may execute concurrently.

mod errors;
mod executor;

pub use errors::ExecutionError;
pub use executor::Engine;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

/// Per-run single-writer guard shared by the engine and the rollback
/// manager
///
/// Holding a lock for a run id marks the run as having an active writer.
/// A second execute, resume, or rollback against the same id is refused
/// with `Busy` instead of interleaving with the first.
#[derive(Default)]
pub struct RunLocks {
    active: Mutex<HashSet<Uuid>>,
}

impl RunLocks {
    pub fn new() -> Self {
        RunLocks::default()
    }

    /// Mark `run_id` as actively written. The returned guard releases the
    /// mark on drop.
    pub fn acquire(self: &Arc<Self>, run_id: Uuid) -> Result<RunLockGuard, ExecutionError> {
        let mut active = match self.active.lock() {
            Ok(active) => active,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !active.insert(run_id) {
            return Err(ExecutionError::Busy { run_id });
        }
        Ok(RunLockGuard {
            locks: Arc::clone(self),
            run_id,
        })
    }
}

/// Active-writer mark for one run, released on drop
pub struct RunLockGuard {
    locks: Arc<RunLocks>,
    run_id: Uuid,
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        let mut active = match self.locks.active.lock() {
            Ok(active) => active,
            Err(poisoned) => poisoned.into_inner(),
        };
        active.remove(&self.run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_busy() {
        let locks = Arc::new(RunLocks::new());
        let run_id = Uuid::new_v4();

        let guard = locks.acquire(run_id).unwrap();
        assert!(matches!(
            locks.acquire(run_id),
            Err(ExecutionError::Busy { .. })
        ));

        drop(guard);
        assert!(locks.acquire(run_id).is_ok());
    }

    #[test]
    fn test_distinct_runs_do_not_contend() {
        let locks = Arc::new(RunLocks::new());
        let _first = locks.acquire(Uuid::new_v4()).unwrap();
        let _second = locks.acquire(Uuid::new_v4()).unwrap();
    }
}
