//! End-to-end engine behaviour over the in-process store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use danci_adaptive::config::EngineConfig;
use danci_adaptive::error::EngineError;
use danci_adaptive::store::{MemoryStore, StateStore, StoreError};
use danci_adaptive::types::{InteractionEvent, ItemLearningState, ItemScore, ItemState};
use danci_adaptive::AdaptiveEngine;

fn engine() -> (AdaptiveEngine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = AdaptiveEngine::new(EngineConfig::default(), store.clone()).unwrap();
    (engine, store)
}

#[tokio::test]
async fn new_learner_gets_a_queue_of_new_items() {
    let (engine, store) = engine();
    for i in 0..10 {
        store.seed_state("u1", ItemLearningState::new(format!("w{i}")));
    }

    let queue = engine.schedule_next("u1", 5).await.unwrap();
    assert_eq!(queue.len(), 5);

    // No history at all yields the empty queue, not an error.
    let empty = engine.schedule_next("nobody", 5).await.unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn interaction_advances_item_and_persists() {
    let (engine, store) = engine();
    store.seed_state("u1", ItemLearningState::new("w1"));

    let feedback = engine
        .record_interaction("u1", InteractionEvent::new("w1", true, 2_000))
        .await
        .unwrap();
    assert_eq!(feedback.item_id, "w1");
    assert_eq!(feedback.mastery_level, 1);
    assert_eq!(feedback.mastery_delta, 1);
    assert_eq!(feedback.state, ItemState::Learning);
    assert!(feedback.next_review_at.is_some());
    assert!(feedback.reward.value > 0.6);

    let states = store.list_item_states("u1").await.unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].mastery_level, 1);
    assert_eq!(states[0].review_count, 1);
}

#[tokio::test]
async fn first_interaction_creates_the_item_row() {
    let (engine, store) = engine();
    engine
        .record_interaction("u1", InteractionEvent::new("unseen", false, 4_000))
        .await
        .unwrap();

    let states = store.list_item_states("u1").await.unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].item_id, "unseen");
    assert_eq!(states[0].mastery_level, 0);
}

#[tokio::test]
async fn five_correct_answers_master_an_item() {
    let (engine, _store) = engine();
    let mut last = None;
    for _ in 0..5 {
        last = Some(
            engine
                .record_interaction("u1", InteractionEvent::new("w1", true, 1_500))
                .await
                .unwrap(),
        );
    }
    let feedback = last.unwrap();
    assert_eq!(feedback.state, ItemState::Mastered);
    assert_eq!(feedback.mastery_level, 5);
}

/// Delegates to a `MemoryStore` but refuses every state write.
struct StateWriteFailStore {
    inner: MemoryStore,
}

#[async_trait]
impl StateStore for StateWriteFailStore {
    async fn load_item_states(
        &self,
        learner_id: &str,
        item_ids: &[String],
    ) -> Result<HashMap<String, ItemLearningState>, StoreError> {
        self.inner.load_item_states(learner_id, item_ids).await
    }

    async fn list_item_states(
        &self,
        learner_id: &str,
    ) -> Result<Vec<ItemLearningState>, StoreError> {
        self.inner.list_item_states(learner_id).await
    }

    async fn load_item_scores(
        &self,
        learner_id: &str,
        item_ids: &[String],
    ) -> Result<HashMap<String, ItemScore>, StoreError> {
        self.inner.load_item_scores(learner_id, item_ids).await
    }

    async fn save_item_state(
        &self,
        _learner_id: &str,
        _state: &ItemLearningState,
    ) -> Result<(), StoreError> {
        Err(StoreError("state table unavailable".to_string()))
    }

    async fn save_item_score(
        &self,
        learner_id: &str,
        score: &ItemScore,
    ) -> Result<(), StoreError> {
        self.inner.save_item_score(learner_id, score).await
    }
}

#[tokio::test]
async fn score_row_is_written_even_when_the_state_write_fails() {
    let store = Arc::new(StateWriteFailStore {
        inner: MemoryStore::new(),
    });
    let engine = AdaptiveEngine::new(EngineConfig::default(), store.clone()).unwrap();

    let err = engine
        .record_interaction("u1", InteractionEvent::new("w1", true, 2_000))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));

    // The companion row was still persisted; the rows cannot drift apart.
    let scores = store
        .load_item_scores("u1", &["w1".to_string()])
        .await
        .unwrap();
    assert_eq!(scores.get("w1").unwrap().total_attempts, 1);
}

#[tokio::test]
async fn invalid_inputs_are_rejected() {
    let (engine, _store) = engine();

    assert!(matches!(
        engine.schedule_next("", 5).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine
            .record_interaction("u1", InteractionEvent::new("", true, 100))
            .await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine
            .record_interaction("u1", InteractionEvent::new("w1", true, -5))
            .await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn concurrent_interactions_are_all_applied() {
    let (engine, store) = engine();
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for i in 0..10 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .record_interaction("u1", InteractionEvent::new(format!("w{i}"), i % 2 == 0, 2_000))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.list_item_states("u1").await.unwrap().len(), 10);
    assert_eq!(engine.isolation().interaction_count("u1").await, 10);
}

#[tokio::test]
async fn learners_do_not_share_state() {
    let (engine, store) = engine();
    engine
        .record_interaction("a", InteractionEvent::new("w1", true, 1_000))
        .await
        .unwrap();
    engine
        .record_interaction("b", InteractionEvent::new("w1", false, 9_000))
        .await
        .unwrap();

    let a = &store.list_item_states("a").await.unwrap()[0];
    let b = &store.list_item_states("b").await.unwrap()[0];
    assert_eq!(a.mastery_level, 1);
    assert_eq!(b.mastery_level, 0);

    let stats = engine.memory_stats().await;
    assert_eq!(stats.live_bundles, 2);
}

#[tokio::test]
async fn strategy_adapts_over_a_session() {
    let (engine, _store) = engine();
    let mut strategies = Vec::new();
    for i in 0..30 {
        let feedback = engine
            .record_interaction("u1", InteractionEvent::new(format!("w{i}"), true, 1_200))
            .await
            .unwrap();
        strategies.push(feedback.strategy);
    }

    // The returned strategy is always within the decodable parameter space.
    for strategy in &strategies {
        assert!((0.5..=1.5).contains(&strategy.interval_scale));
        assert!((0.05..=0.5).contains(&strategy.new_ratio));
        assert!((1..=16).contains(&strategy.batch_size));
    }
}

#[tokio::test]
async fn low_accuracy_history_narrows_the_new_share() {
    let (engine, store) = engine();
    for i in 0..10 {
        store.seed_state("u1", ItemLearningState::new(format!("new{i}")));
        let mut due = ItemLearningState::new(format!("due{i}"));
        due.state = ItemState::Reviewing;
        due.next_review_at = Some(0);
        store.seed_state("u1", due);
    }
    // Build a failing history on unrelated items.
    for i in 0..20 {
        engine
            .record_interaction("u1", InteractionEvent::new(format!("hist{i}"), false, 8_000))
            .await
            .unwrap();
    }

    let queue = engine.schedule_next("u1", 10).await.unwrap();
    let new_count = queue.iter().filter(|id| id.starts_with("new")).count();
    assert_eq!(new_count, 1);
}

#[tokio::test]
async fn sweeper_reclaims_idle_engine_state() {
    let store = Arc::new(MemoryStore::new());
    let mut config = EngineConfig::default();
    config.isolation.model_ttl_ms = 30;
    config.isolation.cleanup_interval_ms = 25;
    let engine = AdaptiveEngine::new(config, store).unwrap();

    engine
        .record_interaction("u1", InteractionEvent::new("w1", true, 1_000))
        .await
        .unwrap();
    assert_eq!(engine.memory_stats().await.live_bundles, 1);

    let sweeper = engine.start_sweeper();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.memory_stats().await.live_bundles, 0);
    sweeper.stop();
}

#[tokio::test]
async fn config_reload_applies_to_later_calls() {
    let (engine, store) = engine();
    for i in 0..10 {
        store.seed_state("u1", ItemLearningState::new(format!("w{i}")));
    }

    let mut config = EngineConfig::default();
    config.isolation.max_users = 0;
    assert!(engine.update_config(config).is_err());

    let mut config = EngineConfig::default();
    config.scheduler.default_ratio = 1.0;
    config.scheduler.high_accuracy_ratio = 1.0;
    engine.update_config(config).unwrap();

    // With the whole ratio given to new items, the queue is all new.
    let queue = engine.schedule_next("u1", 5).await.unwrap();
    assert_eq!(queue.len(), 5);
    assert!(queue.iter().all(|id| id.starts_with("w")));
}
