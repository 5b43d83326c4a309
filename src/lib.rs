//! Adaptive scheduling core for a vocabulary-learning service.
//!
//! Per interaction the engine decides which items a learner should study
//! next and which pedagogical parameters (difficulty, batch size, hint
//! level, review-interval scale, new-item ratio) to apply, while keeping
//! each learner's statistical models safe under concurrent requests and
//! bounded in memory across thousands of simultaneous learners.
//!
//! Three components, dependency-ordered:
//!
//! - [`scheduler`]: pure priority queueing over per-item states and scores.
//! - [`optimizer`]: bounded-memory Gaussian-process tuner for strategy
//!   parameters, one instance per learner.
//! - [`isolation`]: owner of all per-learner model bundles, FIFO mutual
//!   exclusion per learner, TTL expiry and LRU eviction.
//!
//! [`engine::AdaptiveEngine`] wires them together behind the two public
//! operations `schedule_next` and `record_interaction`. Durable persistence
//! is a collaborator behind the [`store::StateStore`] trait; this crate
//! performs no I/O of its own.

pub mod bandit;
pub mod config;
pub mod engine;
pub mod error;
pub mod isolation;
pub mod logging;
pub mod optimizer;
pub mod scheduler;
pub mod store;
pub mod types;

pub use config::{ConfigHandle, EngineConfig, PriorityWeights};
pub use engine::AdaptiveEngine;
pub use error::EngineError;
pub use isolation::IsolationManager;
pub use optimizer::BayesianOptimizer;
pub use store::{MemoryStore, StateStore, StoreError};
pub use types::{
    InteractionEvent, InteractionFeedback, ItemLearningState, ItemScore, ItemState, MemoryStats,
    StrategyParams,
};
