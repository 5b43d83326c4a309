//! Thompson-sampling bandit over discrete strategy candidates.
//!
//! One instance per learner bundle. Each candidate strategy is an arm with
//! a Beta posterior; selection samples every arm and picks the max, update
//! counts a success when the reward clears 0.5. The arm cache is bounded
//! and evicted least-recently-used.

use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::types::{DifficultyLevel, StrategyParams};

const MAX_ARM_CACHE_SIZE: usize = 256;
const MAX_GAMMA_ITERATIONS: usize = 10_000;
const SUCCESS_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BetaArm {
    alpha: f64,
    beta: f64,
    last_used: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyBandit {
    prior_alpha: f64,
    prior_beta: f64,
    arms: HashMap<String, BetaArm>,
    access_counter: u64,
}

impl Default for StrategyBandit {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

impl StrategyBandit {
    pub fn new(prior_alpha: f64, prior_beta: f64) -> Self {
        Self {
            prior_alpha,
            prior_beta,
            arms: HashMap::new(),
            access_counter: 0,
        }
    }

    pub fn arm_count(&self) -> usize {
        self.arms.len()
    }

    /// Samples every candidate's posterior and returns the best draw.
    pub fn select(&mut self, candidates: &[StrategyParams]) -> Option<StrategyParams> {
        if candidates.is_empty() {
            return None;
        }

        let mut rng = rand::rng();
        let mut best_score = f64::NEG_INFINITY;
        let mut best_action = None;

        for candidate in candidates {
            let key = strategy_key(candidate);
            let arm = self.ensure_arm(&key);
            let sample = sample_beta(&mut rng, arm.alpha, arm.beta);
            if sample > best_score {
                best_score = sample;
                best_action = Some(candidate.clone());
            }
        }

        best_action
    }

    pub fn update(&mut self, strategy: &StrategyParams, reward: f64) {
        let key = strategy_key(strategy);
        let mut arm = self.ensure_arm(&key);
        if reward > SUCCESS_THRESHOLD {
            arm.alpha += 1.0;
        } else {
            arm.beta += 1.0;
        }
        self.arms.insert(key, arm);
    }

    fn ensure_arm(&mut self, key: &str) -> BetaArm {
        self.access_counter += 1;
        let counter = self.access_counter;
        self.evict_if_needed();
        self.arms
            .entry(key.to_string())
            .and_modify(|arm| arm.last_used = counter)
            .or_insert_with(|| BetaArm {
                alpha: self.prior_alpha,
                beta: self.prior_beta,
                last_used: counter,
            })
            .clone()
    }

    fn evict_if_needed(&mut self) {
        if self.arms.len() <= MAX_ARM_CACHE_SIZE {
            return;
        }

        let mut entries: Vec<_> = self
            .arms
            .iter()
            .map(|(key, arm)| (key.clone(), arm.last_used))
            .collect();
        entries.sort_by_key(|(_, last_used)| *last_used);

        let to_remove = self.arms.len() - MAX_ARM_CACHE_SIZE / 2;
        for (key, _) in entries.into_iter().take(to_remove) {
            self.arms.remove(&key);
        }
    }
}

fn strategy_key(strategy: &StrategyParams) -> String {
    format!(
        "{}_{:.2}_{:.2}_{}_{}",
        strategy.difficulty.as_str(),
        strategy.new_ratio,
        strategy.interval_scale,
        strategy.batch_size,
        strategy.hint_level
    )
}

/// Candidate grid around the current strategy: difficulty x new-ratio
/// combinations plus single-axis batch-size, hint-level and interval-scale
/// variants. The current strategy is always present.
pub fn strategy_candidates(current: &StrategyParams) -> Vec<StrategyParams> {
    let difficulties = [
        DifficultyLevel::Easy,
        DifficultyLevel::Mid,
        DifficultyLevel::Hard,
    ];
    let new_ratios = [0.1, 0.2, 0.3, 0.4];
    let batch_sizes = [5, 8, 12, 16];
    let hint_levels = [0, 1, 2];
    let interval_scales = [0.8, 1.0, 1.2];

    let mut candidates = Vec::with_capacity(
        difficulties.len() * new_ratios.len()
            + batch_sizes.len()
            + hint_levels.len()
            + interval_scales.len()
            + 1,
    );

    for &difficulty in &difficulties {
        for &new_ratio in &new_ratios {
            candidates.push(StrategyParams {
                difficulty,
                new_ratio,
                ..current.clone()
            });
        }
    }
    for &batch_size in &batch_sizes {
        candidates.push(StrategyParams {
            batch_size,
            ..current.clone()
        });
    }
    for &hint_level in &hint_levels {
        candidates.push(StrategyParams {
            hint_level,
            ..current.clone()
        });
    }
    for &interval_scale in &interval_scales {
        candidates.push(StrategyParams {
            interval_scale,
            ..current.clone()
        });
    }
    if !candidates.contains(current) {
        candidates.push(current.clone());
    }

    candidates
}

fn sample_beta<R: Rng>(rng: &mut R, alpha: f64, beta: f64) -> f64 {
    if alpha <= 0.0 || beta <= 0.0 {
        return 0.5;
    }

    let gamma1 = sample_gamma(rng, alpha, 1.0);
    let gamma2 = sample_gamma(rng, beta, 1.0);
    if gamma1 + gamma2 == 0.0 {
        return 0.5;
    }
    gamma1 / (gamma1 + gamma2)
}

/// Marsaglia-Tsang gamma sampling.
fn sample_gamma<R: Rng>(rng: &mut R, shape: f64, scale: f64) -> f64 {
    if shape < 1.0 {
        let u: f64 = rng.random();
        return sample_gamma(rng, shape + 1.0, scale) * u.powf(1.0 / shape);
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();

    for _ in 0..MAX_GAMMA_ITERATIONS {
        let z = random_normal(rng);
        let v = (1.0 + c * z).powi(3);
        if v <= 0.0 {
            continue;
        }

        let u: f64 = rng.random();
        let z_sq = z * z;
        if u < 1.0 - 0.0331 * z_sq * z_sq {
            return d * v * scale;
        }
        if u.ln() < 0.5 * z_sq + d * (1.0 - v + v.ln()) {
            return d * v * scale;
        }
    }

    d * scale
}

fn random_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.random::<f64>().max(1e-10);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_returns_none_without_candidates() {
        let mut bandit = StrategyBandit::default();
        assert!(bandit.select(&[]).is_none());
    }

    #[test]
    fn select_returns_a_candidate() {
        let mut bandit = StrategyBandit::default();
        let candidates = strategy_candidates(&StrategyParams::default());
        let chosen = bandit.select(&candidates).expect("one candidate chosen");
        assert!(candidates.contains(&chosen));
    }

    #[test]
    fn rewarded_arm_dominates_over_time() {
        let mut bandit = StrategyBandit::default();
        let good = StrategyParams {
            batch_size: 12,
            ..Default::default()
        };
        let bad = StrategyParams {
            batch_size: 5,
            ..Default::default()
        };

        for _ in 0..200 {
            bandit.update(&good, 0.9);
            bandit.update(&bad, 0.1);
        }

        let candidates = vec![good.clone(), bad];
        let mut good_picks = 0;
        for _ in 0..100 {
            if bandit.select(&candidates) == Some(good.clone()) {
                good_picks += 1;
            }
        }
        assert!(good_picks > 80, "good arm picked only {good_picks}/100");
    }

    #[test]
    fn candidate_grid_includes_current() {
        let current = StrategyParams {
            difficulty: DifficultyLevel::Hard,
            batch_size: 7,
            hint_level: 2,
            interval_scale: 1.1,
            new_ratio: 0.25,
        };
        let candidates = strategy_candidates(&current);
        assert!(candidates.contains(&current));
    }

    #[test]
    fn arm_cache_is_bounded() {
        let mut bandit = StrategyBandit::default();
        for i in 0..600 {
            let strategy = StrategyParams {
                batch_size: i,
                ..Default::default()
            };
            bandit.update(&strategy, 0.7);
        }
        assert!(bandit.arm_count() <= MAX_ARM_CACHE_SIZE + 1);
    }
}
