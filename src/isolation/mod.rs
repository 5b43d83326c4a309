//! Isolation layer: per-learner model bundles behind FIFO locks, with TTL
//! expiry, LRU eviction and a capacity ceiling so a busy deployment cannot
//! grow without bound.

pub mod lock;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::bandit::StrategyBandit;
use crate::config::ConfigHandle;
use crate::error::EngineError;
use crate::optimizer::BayesianOptimizer;
use crate::types::{MemoryStats, StrategyParams};
use lock::LearnerLocks;

const RECENT_ANSWER_WINDOW: usize = 20;
const DEFAULT_RECENT_ACCURACY: f64 = 0.7;

/// All adaptive state for one learner. Cloned out of the shared map,
/// mutated under the learner's lock, then stored back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub optimizer: BayesianOptimizer,
    pub bandit: StrategyBandit,
    pub strategy: StrategyParams,
    recent_answers: VecDeque<bool>,
    pub last_accessed_at: i64,
}

impl ModelBundle {
    fn new(optimizer: BayesianOptimizer, now_ms: i64) -> Self {
        Self {
            optimizer,
            bandit: StrategyBandit::default(),
            strategy: StrategyParams::default(),
            recent_answers: VecDeque::with_capacity(RECENT_ANSWER_WINDOW),
            last_accessed_at: now_ms,
        }
    }

    pub fn push_answer(&mut self, is_correct: bool) {
        if self.recent_answers.len() == RECENT_ANSWER_WINDOW {
            self.recent_answers.pop_front();
        }
        self.recent_answers.push_back(is_correct);
    }

    /// Accuracy over the last answers; optimistic default before any
    /// history exists so new learners start on the normal mix.
    pub fn recent_accuracy(&self) -> f64 {
        if self.recent_answers.is_empty() {
            return DEFAULT_RECENT_ACCURACY;
        }
        let correct = self.recent_answers.iter().filter(|c| **c).count();
        correct as f64 / self.recent_answers.len() as f64
    }
}

#[derive(Debug, Clone, Copy)]
struct InteractionCounter {
    count: u64,
    last_updated: i64,
}

/// Counts removed by one sweep pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    pub expired_bundles: usize,
    pub lru_evicted_bundles: usize,
    pub expired_counters: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.expired_bundles + self.lru_evicted_bundles + self.expired_counters
    }
}

pub struct IsolationManager {
    config: Arc<ConfigHandle>,
    bundles: RwLock<HashMap<String, ModelBundle>>,
    interactions: RwLock<HashMap<String, InteractionCounter>>,
    locks: LearnerLocks,
}

impl IsolationManager {
    pub fn new(config: Arc<ConfigHandle>) -> Self {
        Self {
            config,
            bundles: RwLock::new(HashMap::new()),
            interactions: RwLock::new(HashMap::new()),
            locks: LearnerLocks::new(),
        }
    }

    /// Runs `op` inside the learner's FIFO slot with the configured timeout.
    pub async fn with_learner_lock<T, F>(&self, learner_id: &str, op: F) -> Result<T, EngineError>
    where
        F: std::future::Future<Output = Result<T, EngineError>>,
    {
        let timeout_ms = self.config.current().isolation.lock_timeout_ms;
        self.locks.with_lock(learner_id, timeout_ms, op).await
    }

    /// Clones the learner's bundle out of the map, creating it on first
    /// access. At capacity the least recently used bundle is dropped to
    /// make room; callers never see the pressure.
    pub async fn get_or_create(&self, learner_id: &str) -> ModelBundle {
        let now = Utc::now().timestamp_millis();

        {
            let bundles = self.bundles.read().await;
            if let Some(bundle) = bundles.get(learner_id) {
                let mut bundle = bundle.clone();
                bundle.last_accessed_at = now;
                return bundle;
            }
        }

        let config = self.config.current();
        let mut bundles = self.bundles.write().await;
        if let Some(bundle) = bundles.get(learner_id) {
            let mut bundle = bundle.clone();
            bundle.last_accessed_at = now;
            return bundle;
        }

        if bundles.len() >= config.isolation.max_users {
            if let Some(victim) = bundles
                .iter()
                .min_by_key(|(_, b)| b.last_accessed_at)
                .map(|(id, _)| id.clone())
            {
                bundles.remove(&victim);
                warn!(
                    user_id = %victim,
                    max_users = config.isolation.max_users,
                    "bundle capacity reached, evicted least recently used learner"
                );
            }
        }

        let bundle = ModelBundle::new(
            BayesianOptimizer::new(config.optimizer.clone()),
            now,
        );
        bundles.insert(learner_id.to_string(), bundle.clone());
        debug!(user_id = %learner_id, "created model bundle");
        bundle
    }

    /// Writes a mutated bundle back, refreshing its access time.
    ///
    /// Re-checks the capacity ceiling: a store-back racing the eviction in
    /// [`IsolationManager::get_or_create`] would otherwise reintroduce a
    /// bundle the map no longer has room for.
    pub async fn store_bundle(&self, learner_id: &str, mut bundle: ModelBundle) {
        bundle.last_accessed_at = Utc::now().timestamp_millis();
        let max_users = self.config.current().isolation.max_users;

        let mut bundles = self.bundles.write().await;
        if !bundles.contains_key(learner_id) && bundles.len() >= max_users {
            if let Some(victim) = bundles
                .iter()
                .min_by_key(|(_, b)| b.last_accessed_at)
                .map(|(id, _)| id.clone())
            {
                bundles.remove(&victim);
                warn!(
                    user_id = %victim,
                    max_users,
                    "bundle capacity reached on store-back, evicted least recently used learner"
                );
            }
        }
        bundles.insert(learner_id.to_string(), bundle);
    }

    pub async fn touch(&self, learner_id: &str) {
        let now = Utc::now().timestamp_millis();
        if let Some(bundle) = self.bundles.write().await.get_mut(learner_id) {
            bundle.last_accessed_at = now;
        }
    }

    pub async fn record_interaction_count(&self, learner_id: &str) -> u64 {
        let now = Utc::now().timestamp_millis();
        let mut interactions = self.interactions.write().await;
        let counter = interactions
            .entry(learner_id.to_string())
            .or_insert(InteractionCounter {
                count: 0,
                last_updated: now,
            });
        counter.count += 1;
        counter.last_updated = now;
        counter.count
    }

    pub async fn interaction_count(&self, learner_id: &str) -> u64 {
        self.interactions
            .read()
            .await
            .get(learner_id)
            .map(|c| c.count)
            .unwrap_or(0)
    }

    /// Drops all in-memory state for one learner.
    pub async fn reset_learner(&self, learner_id: &str) {
        self.bundles.write().await.remove(learner_id);
        self.interactions.write().await.remove(learner_id);
        info!(user_id = %learner_id, "learner state reset");
    }

    /// One maintenance pass: TTL-expire idle bundles and stale counters,
    /// then LRU-evict down to the low watermark if the bundle map is over
    /// the high watermark.
    pub async fn sweep(&self) -> SweepReport {
        let config = self.config.current();
        let now = Utc::now().timestamp_millis();
        let mut report = SweepReport::default();

        {
            let mut bundles = self.bundles.write().await;
            let before = bundles.len();
            bundles.retain(|_, b| now - b.last_accessed_at < config.isolation.model_ttl_ms);
            report.expired_bundles = before - bundles.len();

            let high = config.isolation.lru_high_watermark();
            if bundles.len() > high {
                let low = config.isolation.lru_low_watermark();
                let mut by_age: Vec<(String, i64)> = bundles
                    .iter()
                    .map(|(id, b)| (id.clone(), b.last_accessed_at))
                    .collect();
                by_age.sort_by_key(|(_, at)| *at);

                let to_evict = bundles.len() - low;
                for (id, _) in by_age.into_iter().take(to_evict) {
                    bundles.remove(&id);
                }
                report.lru_evicted_bundles = to_evict;
            }
        }

        {
            let mut interactions = self.interactions.write().await;
            let before = interactions.len();
            interactions
                .retain(|_, c| now - c.last_updated < config.isolation.interaction_count_ttl_ms);
            report.expired_counters = before - interactions.len();
        }

        if report.total() > 0 {
            info!(
                expired_bundles = report.expired_bundles,
                lru_evicted = report.lru_evicted_bundles,
                expired_counters = report.expired_counters,
                "isolation sweep removed stale state"
            );
        }
        report
    }

    pub async fn memory_stats(&self) -> MemoryStats {
        MemoryStats {
            live_bundles: self.bundles.read().await.len(),
            live_lock_chains: self.locks.live_chains(),
            live_interaction_counters: self.interactions.read().await.len(),
        }
    }
}

/// Stops the background sweeper when asked, or when dropped.
pub struct SweeperHandle {
    shutdown: broadcast::Sender<()>,
}

impl SweeperHandle {
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }
}

/// Spawns the periodic sweep task. Interval comes from the config handle
/// at spawn time; a config reload takes effect on the next spawn.
pub fn spawn_sweeper(manager: Arc<IsolationManager>) -> SweeperHandle {
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
    let interval_ms = manager.config.current().isolation.cleanup_interval_ms;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately.
        ticker.tick().await;

        info!(interval_ms, "isolation sweeper started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    manager.sweep().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("isolation sweeper stopped");
                    break;
                }
            }
        }
    });

    SweeperHandle {
        shutdown: shutdown_tx,
    }
}
