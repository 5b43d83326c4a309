use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Lifecycle stage of one (learner, item) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemState {
    New,
    Learning,
    Reviewing,
    Mastered,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::New => "NEW",
            ItemState::Learning => "LEARNING",
            ItemState::Reviewing => "REVIEWING",
            ItemState::Mastered => "MASTERED",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "NEW" | "new" => Some(ItemState::New),
            "LEARNING" | "learning" => Some(ItemState::Learning),
            "REVIEWING" | "reviewing" | "review" => Some(ItemState::Reviewing),
            "MASTERED" | "mastered" => Some(ItemState::Mastered),
            _ => None,
        }
    }
}

/// Learning state for one item, reconstructed from a single durable row.
///
/// Created on first exposure, mutated after every answer, never deleted
/// while the learner exists. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemLearningState {
    pub item_id: String,
    pub state: ItemState,
    /// 0..=5, drives the review-interval table.
    pub mastery_level: i32,
    pub next_review_at: Option<i64>,
    pub last_review_at: Option<i64>,
    pub review_count: i64,
    pub consecutive_correct: i64,
    pub consecutive_wrong: i64,
}

impl ItemLearningState {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            state: ItemState::New,
            mastery_level: 0,
            next_review_at: None,
            last_review_at: None,
            review_count: 0,
            consecutive_correct: 0,
            consecutive_wrong: 0,
        }
    }

    /// Overdue time in fractional days relative to `now_ms`; zero when not
    /// yet due or never scheduled.
    pub fn overdue_days(&self, now_ms: i64) -> f64 {
        self.next_review_at
            .map(|ts| ((now_ms - ts) as f64 / 86_400_000.0).max(0.0))
            .unwrap_or(0.0)
    }

    pub fn is_due(&self, now_ms: i64) -> bool {
        self.state != ItemState::New && self.next_review_at.is_some_and(|ts| ts <= now_ms)
    }
}

/// Aggregate performance score for one item, independently loadable and
/// used as a priority signal by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemScore {
    pub item_id: String,
    /// 0..=100.
    pub total_score: f64,
    pub total_attempts: i64,
    pub correct_attempts: i64,
    pub average_response_time: f64,
}

impl ItemScore {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            total_score: 0.0,
            total_attempts: 0,
            correct_attempts: 0,
            average_response_time: 0.0,
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.total_attempts > 0 {
            self.correct_attempts as f64 / self.total_attempts as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.total_attempts > 0 {
            1.0 - self.accuracy()
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DifficultyLevel {
    Easy,
    Mid,
    Hard,
}

impl DifficultyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DifficultyLevel::Easy => "EASY",
            DifficultyLevel::Mid => "MID",
            DifficultyLevel::Hard => "HARD",
        }
    }

    /// Position on the unit interval, used by the optimizer encoding.
    pub fn as_unit(&self) -> f64 {
        match self {
            DifficultyLevel::Easy => 0.0,
            DifficultyLevel::Mid => 0.5,
            DifficultyLevel::Hard => 1.0,
        }
    }

    pub fn from_unit(value: f64) -> Self {
        if value < 0.33 {
            DifficultyLevel::Easy
        } else if value < 0.67 {
            DifficultyLevel::Mid
        } else {
            DifficultyLevel::Hard
        }
    }
}

/// Pedagogical parameters applied to one learner's next interactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyParams {
    pub difficulty: DifficultyLevel,
    pub batch_size: i32,
    pub hint_level: i32,
    /// Multiplier applied to the review-interval table.
    pub interval_scale: f64,
    /// Baseline share of unseen items in a study queue; the scheduler
    /// still adjusts by recent accuracy.
    pub new_ratio: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            difficulty: DifficultyLevel::Mid,
            batch_size: 8,
            hint_level: 1,
            interval_scale: 1.0,
            new_ratio: 0.2,
        }
    }
}

impl StrategyParams {
    /// Encoding used by the Bayesian optimizer:
    /// `[interval_scale, new_ratio, difficulty, batch_size]`.
    pub fn to_vector(&self) -> Vec<f64> {
        vec![
            self.interval_scale,
            self.new_ratio,
            self.difficulty.as_unit(),
            self.batch_size as f64,
        ]
    }

    /// Decodes an optimizer suggestion; missing dimensions and the hint
    /// level fall back to `current`.
    pub fn from_vector(values: &[f64], current: &StrategyParams) -> Self {
        let get = |idx: usize, fallback: f64| values.get(idx).copied().unwrap_or(fallback);
        Self {
            interval_scale: get(0, current.interval_scale).clamp(0.5, 1.5),
            new_ratio: get(1, current.new_ratio).clamp(0.05, 0.5),
            difficulty: DifficultyLevel::from_unit(get(2, current.difficulty.as_unit())),
            batch_size: (get(3, current.batch_size as f64).round() as i32).clamp(4, 16),
            hint_level: current.hint_level,
        }
    }
}

/// One answered exposure, as reported by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionEvent {
    pub item_id: String,
    pub is_correct: bool,
    pub response_time_ms: i64,
    #[serde(default)]
    pub hint_used: bool,
    pub timestamp: i64,
}

impl InteractionEvent {
    pub fn new(item_id: impl Into<String>, is_correct: bool, response_time_ms: i64) -> Self {
        Self {
            item_id: item_id.into(),
            is_correct,
            response_time_ms,
            hint_used: false,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Opaque scalar learning signal derived from an interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reward {
    pub value: f64,
    pub reason: String,
    pub ts: i64,
}

impl Reward {
    pub fn new(value: f64, reason: impl Into<String>) -> Self {
        Self {
            value,
            reason: reason.into(),
            ts: Utc::now().timestamp_millis(),
        }
    }
}

/// Result of `record_interaction`, returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionFeedback {
    pub item_id: String,
    pub state: ItemState,
    pub mastery_level: i32,
    /// Change in mastery level produced by this answer.
    pub mastery_delta: i32,
    pub total_score: f64,
    pub next_review_at: Option<i64>,
    pub strategy: StrategyParams,
    pub reward: Reward,
}

/// Observability gauges for the isolation layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub live_bundles: usize,
    pub live_lock_chains: usize,
    pub live_interaction_counters: usize,
}
