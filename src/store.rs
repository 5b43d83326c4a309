use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::types::{ItemLearningState, ItemScore};

/// Failure reported by the durable state collaborator.
#[derive(Debug, thiserror::Error)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

/// Durable per-item state, keyed by (learner id, item id).
///
/// Supplied by the embedding service; assumed eventually consistent and
/// never assumed instantaneous. The engine reconstructs a learner entirely
/// from these per-item rows, so no per-learner cursor row is required.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_item_states(
        &self,
        learner_id: &str,
        item_ids: &[String],
    ) -> Result<HashMap<String, ItemLearningState>, StoreError>;

    /// All item states known for a learner, for queue construction.
    async fn list_item_states(
        &self,
        learner_id: &str,
    ) -> Result<Vec<ItemLearningState>, StoreError>;

    async fn load_item_scores(
        &self,
        learner_id: &str,
        item_ids: &[String],
    ) -> Result<HashMap<String, ItemScore>, StoreError>;

    async fn save_item_state(
        &self,
        learner_id: &str,
        state: &ItemLearningState,
    ) -> Result<(), StoreError>;

    async fn save_item_score(
        &self,
        learner_id: &str,
        score: &ItemScore,
    ) -> Result<(), StoreError>;
}

/// In-process store for tests and embedding without a database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    states: RwLock<HashMap<(String, String), ItemLearningState>>,
    scores: RwLock<HashMap<(String, String), ItemScore>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_state(&self, learner_id: &str, state: ItemLearningState) {
        self.states
            .write()
            .insert((learner_id.to_string(), state.item_id.clone()), state);
    }

    pub fn seed_score(&self, learner_id: &str, score: ItemScore) {
        self.scores
            .write()
            .insert((learner_id.to_string(), score.item_id.clone()), score);
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load_item_states(
        &self,
        learner_id: &str,
        item_ids: &[String],
    ) -> Result<HashMap<String, ItemLearningState>, StoreError> {
        let states = self.states.read();
        let mut out = HashMap::with_capacity(item_ids.len());
        for item_id in item_ids {
            if let Some(state) = states.get(&(learner_id.to_string(), item_id.clone())) {
                out.insert(item_id.clone(), state.clone());
            }
        }
        Ok(out)
    }

    async fn list_item_states(
        &self,
        learner_id: &str,
    ) -> Result<Vec<ItemLearningState>, StoreError> {
        let states = self.states.read();
        Ok(states
            .iter()
            .filter(|((lid, _), _)| lid == learner_id)
            .map(|(_, state)| state.clone())
            .collect())
    }

    async fn load_item_scores(
        &self,
        learner_id: &str,
        item_ids: &[String],
    ) -> Result<HashMap<String, ItemScore>, StoreError> {
        let scores = self.scores.read();
        let mut out = HashMap::with_capacity(item_ids.len());
        for item_id in item_ids {
            if let Some(score) = scores.get(&(learner_id.to_string(), item_id.clone())) {
                out.insert(item_id.clone(), score.clone());
            }
        }
        Ok(out)
    }

    async fn save_item_state(
        &self,
        learner_id: &str,
        state: &ItemLearningState,
    ) -> Result<(), StoreError> {
        self.states.write().insert(
            (learner_id.to_string(), state.item_id.clone()),
            state.clone(),
        );
        Ok(())
    }

    async fn save_item_score(
        &self,
        learner_id: &str,
        score: &ItemScore,
    ) -> Result<(), StoreError> {
        self.scores.write().insert(
            (learner_id.to_string(), score.item_id.clone()),
            score.clone(),
        );
        Ok(())
    }
}
