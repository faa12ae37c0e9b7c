//! Per-run mutual exclusion
//!
//! Transitions on one run are serialized; transitions on different runs
//! never wait on each other.

use flowline_types::RunId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Default)]
pub struct RunLocks {
    locks: Mutex<HashMap<RunId, Arc<tokio::sync::Mutex<()>>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a run
    pub async fn lock(&self, run_id: &RunId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(run_id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drop the lock entry of a run nobody is waiting on
    pub fn release(&self, run_id: &RunId) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lock) = locks.get(run_id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(run_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entries(locks: &RunLocks) -> usize {
        locks.locks.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_same_run_is_serialized() {
        let locks = Arc::new(RunLocks::new());
        let run = RunId::new("r1");

        let guard = locks.lock(&run).await;
        let waiter = {
            let locks = locks.clone();
            let run = run.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&run).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_runs_do_not_block() {
        let locks = RunLocks::new();
        let _a = locks.lock(&RunId::new("a")).await;
        let _b = locks.lock(&RunId::new("b")).await;
        assert_eq!(entries(&locks), 2);
    }

    #[tokio::test]
    async fn test_release_keeps_held_locks() {
        let locks = RunLocks::new();
        let run = RunId::new("r1");
        let guard = locks.lock(&run).await;
        locks.release(&run);
        assert_eq!(entries(&locks), 1);
        drop(guard);
        locks.release(&run);
        assert_eq!(entries(&locks), 0);
    }
}
