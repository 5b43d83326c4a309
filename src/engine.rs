//! Engine facade: wires the scheduler, the per-learner optimizer/bandit
//! bundles and the isolation layer behind two operations, `schedule_next`
//! and `record_interaction`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::bandit::strategy_candidates;
use crate::config::{ConfigHandle, EngineConfig};
use crate::error::EngineError;
use crate::isolation::{spawn_sweeper, IsolationManager, SweeperHandle};
use crate::scheduler;
use crate::store::StateStore;
use crate::types::{
    InteractionEvent, InteractionFeedback, ItemLearningState, ItemScore, ItemState, MemoryStats,
    Reward, StrategyParams,
};

const DAY_MS: f64 = 86_400_000.0;
/// Mastery level at which an item counts as mastered.
const MASTERY_CEILING: i32 = 5;
/// Mastery level at which an item graduates from LEARNING to REVIEWING.
const REVIEWING_FLOOR: i32 = 3;
/// Response time mapped to a zero speed signal.
const SLOWEST_USEFUL_RESPONSE_MS: f64 = 10_000.0;
/// Smoothing factor for the per-item response-time average.
const RESPONSE_TIME_EMA: f64 = 0.3;

pub struct AdaptiveEngine {
    config: Arc<ConfigHandle>,
    store: Arc<dyn StateStore>,
    isolation: Arc<IsolationManager>,
}

impl AdaptiveEngine {
    pub fn new(config: EngineConfig, store: Arc<dyn StateStore>) -> Result<Self, EngineError> {
        let config = Arc::new(ConfigHandle::new(config)?);
        let isolation = Arc::new(IsolationManager::new(Arc::clone(&config)));
        Ok(Self {
            config,
            store,
            isolation,
        })
    }

    /// Starts the periodic maintenance sweep over per-learner state.
    pub fn start_sweeper(&self) -> SweeperHandle {
        spawn_sweeper(Arc::clone(&self.isolation))
    }

    pub fn isolation(&self) -> &IsolationManager {
        &self.isolation
    }

    /// Swaps in a new validated configuration; in-flight operations keep
    /// the snapshot they started with.
    pub fn update_config(&self, config: EngineConfig) -> Result<(), EngineError> {
        self.config.replace(config)
    }

    pub async fn memory_stats(&self) -> MemoryStats {
        self.isolation.memory_stats().await
    }

    /// Builds the learner's next study queue of up to `target_count` items.
    pub async fn schedule_next(
        &self,
        learner_id: &str,
        target_count: usize,
    ) -> Result<Vec<String>, EngineError> {
        validate_learner_id(learner_id)?;
        if target_count == 0 {
            return Ok(Vec::new());
        }

        self.isolation
            .with_learner_lock(learner_id, async {
                let bundle = self.isolation.get_or_create(learner_id).await;
                let recent_accuracy = bundle.recent_accuracy();

                let states = self.store.list_item_states(learner_id).await?;
                let item_ids: Vec<String> = states.iter().map(|s| s.item_id.clone()).collect();
                let scores = self.store.load_item_scores(learner_id, &item_ids).await?;

                let config = self.config.current();
                let now = Utc::now().timestamp_millis();
                let queue = scheduler::build_queue(
                    &states,
                    &scores,
                    target_count,
                    recent_accuracy,
                    now,
                    &config.scheduler,
                );

                debug!(
                    user_id = %learner_id,
                    queue_len = queue.len(),
                    recent_accuracy,
                    "built study queue"
                );
                self.isolation.store_bundle(learner_id, bundle).await;
                Ok(queue)
            })
            .await
    }

    /// Applies one answered exposure: advances the item's lifecycle and
    /// score, feeds the reward to the learner's optimizer and bandit, and
    /// returns the updated state with the strategy for the next exposures.
    ///
    /// Both per-item rows are written even when one write fails, so a
    /// store error cannot leave an advanced state row next to a stale
    /// score row; the first failure is then returned.
    pub async fn record_interaction(
        &self,
        learner_id: &str,
        event: InteractionEvent,
    ) -> Result<InteractionFeedback, EngineError> {
        validate_learner_id(learner_id)?;
        if event.item_id.trim().is_empty() {
            return Err(EngineError::Validation("itemId must be non-empty".into()));
        }
        if event.response_time_ms < 0 {
            return Err(EngineError::Validation(
                "responseTimeMs must be non-negative".into(),
            ));
        }

        self.isolation
            .with_learner_lock(learner_id, async {
                let config = self.config.current();
                let now = Utc::now().timestamp_millis();
                let mut bundle = self.isolation.get_or_create(learner_id).await;

                let item_ids = vec![event.item_id.clone()];
                let mut state = self
                    .store
                    .load_item_states(learner_id, &item_ids)
                    .await?
                    .remove(&event.item_id)
                    .unwrap_or_else(|| ItemLearningState::new(&event.item_id));
                let mut score = self
                    .store
                    .load_item_scores(learner_id, &item_ids)
                    .await?
                    .remove(&event.item_id)
                    .unwrap_or_else(|| ItemScore::new(&event.item_id));

                let mastery_before = state.mastery_level;
                apply_answer(
                    &mut state,
                    &event,
                    &config.scheduler,
                    bundle.strategy.interval_scale,
                    now,
                );
                update_score(&mut score, &event);
                let reward = compute_reward(&event);

                bundle.push_answer(event.is_correct);
                bundle
                    .optimizer
                    .record_evaluation(bundle.strategy.to_vector(), reward.value);

                if !bundle.optimizer.should_stop() {
                    let suggestion = bundle.optimizer.suggest_next();
                    let suggested = StrategyParams::from_vector(&suggestion, &bundle.strategy);
                    let mut candidates = strategy_candidates(&bundle.strategy);
                    if !candidates.contains(&suggested) {
                        candidates.push(suggested);
                    }
                    if let Some(chosen) = bundle.bandit.select(&candidates) {
                        bundle.bandit.update(&chosen, reward.value);
                        if chosen != bundle.strategy {
                            info!(
                                user_id = %learner_id,
                                difficulty = chosen.difficulty.as_str(),
                                batch_size = chosen.batch_size,
                                "strategy switched"
                            );
                        }
                        bundle.strategy = chosen;
                    }
                }

                self.isolation.record_interaction_count(learner_id).await;
                let state_saved = self.store.save_item_state(learner_id, &state).await;
                let score_saved = self.store.save_item_score(learner_id, &score).await;
                state_saved?;
                score_saved?;

                let feedback = InteractionFeedback {
                    item_id: event.item_id.clone(),
                    state: state.state,
                    mastery_level: state.mastery_level,
                    mastery_delta: state.mastery_level - mastery_before,
                    total_score: score.total_score,
                    next_review_at: state.next_review_at,
                    strategy: bundle.strategy.clone(),
                    reward,
                };
                self.isolation.store_bundle(learner_id, bundle).await;
                Ok(feedback)
            })
            .await
    }
}

fn validate_learner_id(learner_id: &str) -> Result<(), EngineError> {
    if learner_id.trim().is_empty() {
        return Err(EngineError::Validation("learnerId must be non-empty".into()));
    }
    Ok(())
}

/// Lifecycle transition for one answer: mastery moves one level per
/// answer, the state follows mastery, and the next review is scheduled
/// from the interval table scaled by the learner's current strategy.
fn apply_answer(
    state: &mut ItemLearningState,
    event: &InteractionEvent,
    config: &crate::config::SchedulerConfig,
    interval_scale: f64,
    now_ms: i64,
) {
    if event.is_correct {
        state.consecutive_correct += 1;
        state.consecutive_wrong = 0;
        state.mastery_level = (state.mastery_level + 1).min(MASTERY_CEILING);
    } else {
        state.consecutive_wrong += 1;
        state.consecutive_correct = 0;
        state.mastery_level = (state.mastery_level - 1).max(0);
    }

    state.state = if state.mastery_level >= MASTERY_CEILING {
        ItemState::Mastered
    } else if state.mastery_level >= REVIEWING_FLOOR {
        ItemState::Reviewing
    } else {
        ItemState::Learning
    };

    state.review_count += 1;
    state.last_review_at = Some(now_ms);
    let interval_ms = config.interval_days(state.mastery_level) * DAY_MS * interval_scale;
    state.next_review_at = Some(now_ms + interval_ms as i64);
}

fn speed_signal(response_time_ms: i64) -> f64 {
    (1.0 - response_time_ms as f64 / SLOWEST_USEFUL_RESPONSE_MS).clamp(0.0, 1.0)
}

fn update_score(score: &mut ItemScore, event: &InteractionEvent) {
    score.total_attempts += 1;
    if event.is_correct {
        score.correct_attempts += 1;
    }
    score.average_response_time = if score.total_attempts == 1 {
        event.response_time_ms as f64
    } else {
        score.average_response_time * (1.0 - RESPONSE_TIME_EMA)
            + event.response_time_ms as f64 * RESPONSE_TIME_EMA
    };

    let speed = speed_signal(score.average_response_time as i64);
    score.total_score = (0.7 * score.accuracy() * 100.0 + 0.3 * speed * 100.0).clamp(0.0, 100.0);
}

/// Scalar learning signal in [0, 1]: correctness dominates, response
/// speed refines.
fn compute_reward(event: &InteractionEvent) -> Reward {
    let accuracy = if event.is_correct { 1.0 } else { 0.0 };
    let speed = speed_signal(event.response_time_ms);
    let value = (0.6 * accuracy + 0.4 * speed).clamp(0.0, 1.0);

    let reason = if event.is_correct {
        if event.hint_used {
            "correct with hint"
        } else {
            "correct"
        }
    } else {
        "incorrect"
    };
    Reward::new(value, reason)
}
