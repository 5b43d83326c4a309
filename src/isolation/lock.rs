//! Per-learner FIFO serialization.
//!
//! Each learner id maps to a chain entry holding a fair async mutex token
//! and a waiter count. Callers queue on the token in arrival order; the
//! entry is dropped when the last waiter leaves, so the table only holds
//! learners with in-flight work. The timeout covers queue wait plus
//! execution, and a timed-out caller leaves the chain intact for the
//! others behind it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::EngineError;

#[derive(Clone)]
struct ChainEntry {
    token: Arc<tokio::sync::Mutex<()>>,
    waiters: usize,
}

#[derive(Default)]
pub struct LearnerLocks {
    chains: Mutex<HashMap<String, ChainEntry>>,
}

/// Removes the caller from its chain on every exit path, including
/// timeout-induced future drops.
struct ChainGuard<'a> {
    locks: &'a LearnerLocks,
    learner_id: String,
}

impl Drop for ChainGuard<'_> {
    fn drop(&mut self) {
        let mut chains = self.locks.chains.lock();
        if let Some(entry) = chains.get_mut(&self.learner_id) {
            entry.waiters -= 1;
            if entry.waiters == 0 {
                chains.remove(&self.learner_id);
            }
        }
    }
}

impl LearnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of learners with at least one queued or running operation.
    pub fn live_chains(&self) -> usize {
        self.chains.lock().len()
    }

    fn join_chain(&self, learner_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut chains = self.chains.lock();
        let entry = chains
            .entry(learner_id.to_string())
            .or_insert_with(|| ChainEntry {
                token: Arc::new(tokio::sync::Mutex::new(())),
                waiters: 0,
            });
        entry.waiters += 1;
        Arc::clone(&entry.token)
    }

    /// Runs `op` holding the learner's exclusive slot.
    ///
    /// `timeout_ms` bounds queue wait plus execution; on expiry the pending
    /// operation is dropped at its next await point and the caller gets
    /// `EngineError::LockTimeout`.
    pub async fn with_lock<T, F>(
        &self,
        learner_id: &str,
        timeout_ms: u64,
        op: F,
    ) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        let token = self.join_chain(learner_id);
        let _guard = ChainGuard {
            locks: self,
            learner_id: learner_id.to_string(),
        };

        let run = async move {
            let _held = token.lock().await;
            op.await
        };

        match tokio::time::timeout(Duration::from_millis(timeout_ms), run).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    user_id = %learner_id,
                    timeout_ms,
                    "learner operation timed out waiting for its turn"
                );
                Err(EngineError::LockTimeout(timeout_ms))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn chain_entry_is_removed_when_idle() {
        let locks = LearnerLocks::new();
        let out = locks
            .with_lock("u1", 1_000, async { Ok::<_, EngineError>(7) })
            .await
            .unwrap();
        assert_eq!(out, 7);
        assert_eq!(locks.live_chains(), 0);
    }

    #[tokio::test]
    async fn operations_on_one_learner_are_serialized() {
        let locks = Arc::new(LearnerLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                locks
                    .with_lock("u1", 5_000, async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, EngineError>(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(locks.live_chains(), 0);
    }

    #[tokio::test]
    async fn timeout_covers_queue_wait() {
        let locks = Arc::new(LearnerLocks::new());

        let holder = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                locks
                    .with_lock("u1", 5_000, async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, EngineError>(())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = locks
            .with_lock("u1", 10, async { Ok::<_, EngineError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::LockTimeout(10)));
        assert!(err.is_retryable());

        holder.await.unwrap().unwrap();
        assert_eq!(locks.live_chains(), 0);
    }

    #[tokio::test]
    async fn timed_out_waiter_does_not_break_the_chain() {
        let locks = Arc::new(LearnerLocks::new());
        let completed = Arc::new(AtomicUsize::new(0));

        let holder = {
            let locks = Arc::clone(&locks);
            let completed = Arc::clone(&completed);
            tokio::spawn(async move {
                locks
                    .with_lock("u1", 5_000, async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        completed.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, EngineError>(())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // This waiter expires while queued.
        let err = locks
            .with_lock("u1", 5, async { Ok::<_, EngineError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::LockTimeout(_)));

        holder.await.unwrap().unwrap();

        // A later arrival still gets through.
        let completed2 = Arc::clone(&completed);
        locks
            .with_lock("u1", 5_000, async move {
                completed2.fetch_add(1, Ordering::SeqCst);
                Ok::<_, EngineError>(())
            })
            .await
            .unwrap();
        assert_eq!(completed.load(Ordering::SeqCst), 2);
        assert_eq!(locks.live_chains(), 0);
    }

    #[tokio::test]
    async fn different_learners_do_not_wait_on_each_other() {
        let locks = Arc::new(LearnerLocks::new());

        let slow = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                locks
                    .with_lock("slow", 5_000, async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, EngineError>("slow")
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        let started = std::time::Instant::now();
        let fast = locks
            .with_lock("fast", 5_000, async { Ok::<_, EngineError>("fast") })
            .await
            .unwrap();
        assert_eq!(fast, "fast");
        assert!(started.elapsed() < Duration::from_millis(50));

        assert_eq!(slow.await.unwrap().unwrap(), "slow");
    }
}
