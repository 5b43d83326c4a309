use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Signal weights for the study-queue priority score. Non-negative and
/// finite; no sum constraint (normalisation is an upstream concern).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityWeights {
    pub new_item: f64,
    pub error_rate: f64,
    pub overdue_time: f64,
    pub item_score: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            new_item: 50.0,
            error_rate: 30.0,
            overdue_time: 40.0,
            item_score: 30.0,
        }
    }
}

impl PriorityWeights {
    pub fn validate(&self) -> Result<(), EngineError> {
        for (name, value) in [
            ("newItem", self.new_item),
            ("errorRate", self.error_rate),
            ("overdueTime", self.overdue_time),
            ("itemScore", self.item_score),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::Validation(format!(
                    "priority weight {name} must be non-negative and finite, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    pub weights: PriorityWeights,
    /// Accuracy at or above this uses `high_accuracy_ratio`.
    pub high_accuracy_threshold: f64,
    /// Accuracy at or below this uses `low_accuracy_ratio`.
    pub low_accuracy_threshold: f64,
    pub high_accuracy_ratio: f64,
    pub low_accuracy_ratio: f64,
    pub default_ratio: f64,
    /// Overdue contribution saturates after this many days.
    pub overdue_saturation_days: f64,
    /// Review interval in days, indexed by mastery level.
    pub review_intervals_days: Vec<f64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            weights: PriorityWeights::default(),
            high_accuracy_threshold: 0.85,
            low_accuracy_threshold: 0.40,
            high_accuracy_ratio: 0.5,
            low_accuracy_ratio: 0.1,
            default_ratio: 0.3,
            overdue_saturation_days: 7.0,
            review_intervals_days: vec![1.0, 2.0, 4.0, 7.0, 15.0, 30.0],
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        self.weights.validate()?;
        for (name, value) in [
            ("highAccuracyThreshold", self.high_accuracy_threshold),
            ("lowAccuracyThreshold", self.low_accuracy_threshold),
            ("highAccuracyRatio", self.high_accuracy_ratio),
            ("lowAccuracyRatio", self.low_accuracy_ratio),
            ("defaultRatio", self.default_ratio),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Validation(format!(
                    "scheduler field {name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.low_accuracy_threshold >= self.high_accuracy_threshold {
            return Err(EngineError::Validation(
                "lowAccuracyThreshold must be below highAccuracyThreshold".to_string(),
            ));
        }
        if self.overdue_saturation_days <= 0.0 || !self.overdue_saturation_days.is_finite() {
            return Err(EngineError::Validation(
                "overdueSaturationDays must be positive".to_string(),
            ));
        }
        if self.review_intervals_days.is_empty()
            || self
                .review_intervals_days
                .iter()
                .any(|d| !d.is_finite() || *d <= 0.0)
        {
            return Err(EngineError::Validation(
                "reviewIntervalsDays must be a non-empty list of positive days".to_string(),
            ));
        }
        Ok(())
    }

    /// Review interval for a mastery level, clamped to the table bounds.
    pub fn interval_days(&self, mastery_level: i32) -> f64 {
        let idx = (mastery_level.max(0) as usize).min(self.review_intervals_days.len() - 1);
        self.review_intervals_days[idx]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerConfig {
    /// Sliding-window capacity; bounds the O(n^3) factorization cost.
    pub max_observations: usize,
    /// Pure exploration until this many observations exist.
    pub initial_samples: usize,
    /// `should_stop` threshold on the monotonic evaluation counter.
    pub max_evaluations: u64,
    pub length_scale: f64,
    pub signal_variance: f64,
    pub noise: f64,
    /// UCB exploration factor (mean + kappa * std).
    pub kappa: f64,
    pub candidate_count: usize,
    /// Inclusive search bounds per parameter dimension.
    pub bounds: Vec<(f64, f64)>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_observations: 200,
            initial_samples: 10,
            max_evaluations: 500,
            length_scale: 1.0,
            signal_variance: 1.0,
            noise: 1e-6,
            kappa: 2.0,
            candidate_count: 32,
            // interval_scale, new_ratio, difficulty, batch_size
            bounds: vec![(0.5, 1.5), (0.05, 0.5), (0.0, 1.0), (4.0, 16.0)],
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_observations == 0 {
            return Err(EngineError::Validation(
                "maxObservations must be positive".to_string(),
            ));
        }
        if self.initial_samples == 0 || self.initial_samples > self.max_observations {
            return Err(EngineError::Validation(format!(
                "initialSamples must be within [1, maxObservations], got {}",
                self.initial_samples
            )));
        }
        if self.candidate_count == 0 {
            return Err(EngineError::Validation(
                "candidateCount must be positive".to_string(),
            ));
        }
        for (name, value) in [
            ("lengthScale", self.length_scale),
            ("signalVariance", self.signal_variance),
            ("noise", self.noise),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(EngineError::Validation(format!(
                    "optimizer field {name} must be positive, got {value}"
                )));
            }
        }
        if !self.kappa.is_finite() || self.kappa < 0.0 {
            return Err(EngineError::Validation(
                "kappa must be non-negative".to_string(),
            ));
        }
        if self.bounds.is_empty() || self.bounds.iter().any(|(lo, hi)| {
            !lo.is_finite() || !hi.is_finite() || lo >= hi
        }) {
            return Err(EngineError::Validation(
                "optimizer bounds must be non-empty (lo, hi) pairs with lo < hi".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsolationConfig {
    /// Hard ceiling on live model bundles.
    pub max_users: usize,
    /// Bundles untouched this long are expired by the sweep.
    pub model_ttl_ms: i64,
    /// Interaction counters untouched this long are expired by the sweep.
    pub interaction_count_ttl_ms: i64,
    pub cleanup_interval_ms: u64,
    /// LRU eviction starts once live bundles exceed
    /// `max_users * lru_eviction_threshold`.
    pub lru_eviction_threshold: f64,
    /// Default bound on lock wait plus wrapped operation.
    pub lock_timeout_ms: u64,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            max_users: 1000,
            model_ttl_ms: 30 * 60 * 1000,
            interaction_count_ttl_ms: 24 * 60 * 60 * 1000,
            cleanup_interval_ms: 10 * 60 * 1000,
            lru_eviction_threshold: 0.9,
            lock_timeout_ms: 30_000,
        }
    }
}

impl IsolationConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_users == 0 {
            return Err(EngineError::Validation(
                "maxUsers must be positive".to_string(),
            ));
        }
        if self.model_ttl_ms <= 0 || self.interaction_count_ttl_ms <= 0 {
            return Err(EngineError::Validation(
                "TTLs must be positive".to_string(),
            ));
        }
        if self.cleanup_interval_ms == 0 || self.lock_timeout_ms == 0 {
            return Err(EngineError::Validation(
                "cleanupIntervalMs and lockTimeoutMs must be positive".to_string(),
            ));
        }
        if !self.lru_eviction_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.lru_eviction_threshold)
            || self.lru_eviction_threshold == 0.0
        {
            return Err(EngineError::Validation(
                "lruEvictionThreshold must be within (0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    /// Live-bundle count that triggers LRU eviction.
    pub fn lru_high_watermark(&self) -> usize {
        (self.max_users as f64 * self.lru_eviction_threshold).floor() as usize
    }

    /// Target the sweep evicts down to once triggered.
    pub fn lru_low_watermark(&self) -> usize {
        (self.max_users as f64 * self.lru_eviction_threshold * 0.8).floor() as usize
    }
}

/// Versioned engine configuration, validated once at load and passed by
/// immutable `Arc` afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub optimizer: OptimizerConfig,
    pub isolation: IsolationConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        self.scheduler.validate()?;
        self.optimizer.validate()?;
        self.isolation.validate()
    }

    /// Parses a JSON configuration document and validates it.
    pub fn from_json(input: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(input)
            .map_err(|e| EngineError::Validation(format!("config parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides for the operational knobs.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ADAPTIVE_MAX_USERS") {
            if let Ok(parsed) = val.parse() {
                config.isolation.max_users = parsed;
            }
        }
        if let Ok(val) = std::env::var("ADAPTIVE_MODEL_TTL_MS") {
            if let Ok(parsed) = val.parse() {
                config.isolation.model_ttl_ms = parsed;
            }
        }
        if let Ok(val) = std::env::var("ADAPTIVE_CLEANUP_INTERVAL_MS") {
            if let Ok(parsed) = val.parse() {
                config.isolation.cleanup_interval_ms = parsed;
            }
        }
        if let Ok(val) = std::env::var("ADAPTIVE_LOCK_TIMEOUT_MS") {
            if let Ok(parsed) = val.parse() {
                config.isolation.lock_timeout_ms = parsed;
            }
        }
        if let Ok(val) = std::env::var("ADAPTIVE_MAX_OBSERVATIONS") {
            if let Ok(parsed) = val.parse() {
                config.optimizer.max_observations = parsed;
            }
        }

        config
    }
}

/// Hot-reloadable configuration handle. Callers re-read per call via
/// [`ConfigHandle::current`]; `replace` swaps in a validated snapshot.
#[derive(Debug)]
pub struct ConfigHandle {
    inner: RwLock<Arc<EngineConfig>>,
}

impl ConfigHandle {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            inner: RwLock::new(Arc::new(config)),
        })
    }

    pub fn current(&self) -> Arc<EngineConfig> {
        Arc::clone(&self.inner.read())
    }

    pub fn replace(&self, config: EngineConfig) -> Result<(), EngineError> {
        config.validate()?;
        *self.inner.write() = Arc::new(config);
        tracing::info!("engine config reloaded");
        Ok(())
    }
}
