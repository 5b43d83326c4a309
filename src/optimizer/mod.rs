//! Bounded-memory Bayesian optimizer for one learner's strategy
//! parameters.
//!
//! Observations live in a sliding FIFO window of `max_observations`
//! entries, which caps the covariance matrix at a fixed size and keeps the
//! O(n^3) factorization affordable per call. The Cholesky factor is cached
//! and recomputed only when the observation set changes.

pub mod matrix;

use std::collections::VecDeque;

use chrono::Utc;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::OptimizerConfig;

/// One (parameters, reward) measurement. Immutable, owned by a single
/// optimizer instance, retained only while inside its window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub params: Vec<f64>,
    pub reward: f64,
    pub observed_at: i64,
}

/// Cached GP posterior precomputation for the current window.
#[derive(Debug, Clone)]
struct Posterior {
    /// Lower Cholesky factor of `K + noise * I`.
    chol: Vec<f64>,
    /// `(K + noise I)^-1 (y - mean)`.
    alpha: Vec<f64>,
    mean: f64,
    n: usize,
}

fn default_rng() -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(0x51_EE_D0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BayesianOptimizer {
    config: OptimizerConfig,
    observations: VecDeque<Observation>,
    /// Highest-reward observation inside the current window. A past best
    /// is lost once evicted; callers wanting history cache it themselves.
    best: Option<Observation>,
    /// Monotonic; not reduced by eviction or window churn.
    evaluations: u64,
    #[serde(skip)]
    posterior: Option<Posterior>,
    #[serde(skip, default = "default_rng")]
    rng: ChaCha8Rng,
}

impl BayesianOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        let seed = rand::rng().random();
        Self::with_seed(config, seed)
    }

    /// Seeded construction for reproducible exploration.
    pub fn with_seed(config: OptimizerConfig, seed: u64) -> Self {
        Self {
            config,
            observations: VecDeque::new(),
            best: None,
            evaluations: 0,
            posterior: None,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    pub fn best(&self) -> Option<&Observation> {
        self.best.as_ref()
    }

    pub fn observations(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    /// Ingests one measurement, evicting the oldest observation when the
    /// window is full and invalidating the cached factorization.
    pub fn record_evaluation(&mut self, params: Vec<f64>, reward: f64) {
        let observation = Observation {
            params,
            reward,
            observed_at: Utc::now().timestamp_millis(),
        };

        let mut evicted_best = false;
        if self.observations.len() >= self.config.max_observations {
            let evicted = self.observations.pop_front();
            if let (Some(evicted), Some(best)) = (evicted.as_ref(), self.best.as_ref()) {
                evicted_best =
                    evicted.reward == best.reward && evicted.observed_at == best.observed_at;
            }
        }
        self.observations.push_back(observation);

        if evicted_best {
            // The window no longer contains the old best; rescan.
            self.best = self
                .observations
                .iter()
                .max_by(|a, b| a.reward.total_cmp(&b.reward))
                .cloned();
        } else if let Some(newest) = self.observations.back() {
            let improved = self
                .best
                .as_ref()
                .map_or(true, |best| newest.reward > best.reward);
            if improved {
                self.best = Some(newest.clone());
            }
        }

        self.evaluations += 1;
        self.posterior = None;
    }

    /// True once the monotonic evaluation counter reaches the configured
    /// budget; eviction never resets it.
    pub fn should_stop(&self) -> bool {
        self.evaluations >= self.config.max_evaluations
    }

    /// Clears observations, best, counters and the cached factorization.
    /// Explicit only; nothing calls this automatically.
    pub fn reset(&mut self) {
        self.observations.clear();
        self.best = None;
        self.evaluations = 0;
        self.posterior = None;
    }

    /// Proposes the next parameter vector.
    ///
    /// Below `initial_samples` observations this is a pseudo-random point
    /// inside the search bounds; afterwards it maximises the UCB
    /// acquisition (posterior mean + kappa * std) over a sampled candidate
    /// set using exact GP regression on the window.
    pub fn suggest_next(&mut self) -> Vec<f64> {
        if self.observations.len() < self.config.initial_samples {
            return self.explore();
        }

        if self.posterior.is_none() {
            self.posterior = self.factorize();
        }
        let Some(posterior) = self.posterior.clone() else {
            // Degenerate covariance even after jitter; fall back to
            // exploration rather than surfacing an error.
            return self.explore();
        };

        let mut best_point = self.explore();
        let mut best_score = f64::NEG_INFINITY;
        for _ in 0..self.config.candidate_count {
            let candidate = self.explore();
            let score = self.acquisition(&posterior, &candidate);
            if score > best_score {
                best_score = score;
                best_point = candidate;
            }
        }
        best_point
    }

    fn explore(&mut self) -> Vec<f64> {
        self.config
            .bounds
            .iter()
            .map(|&(lo, hi)| lo + self.rng.random::<f64>() * (hi - lo))
            .collect()
    }

    fn kernel(&self, a: &[f64], b: &[f64]) -> f64 {
        let ls2 = self.config.length_scale * self.config.length_scale;
        let dist2: f64 = a
            .iter()
            .zip(b.iter())
            .map(|(&x, &y)| (x - y) * (x - y))
            .sum();
        self.config.signal_variance * (-0.5 * dist2 / ls2).exp()
    }

    /// Builds `K + noise I` (upper triangle computed once, mirrored) and
    /// factorizes it, retrying once with diagonal jitter on failure.
    fn factorize(&self) -> Option<Posterior> {
        let n = self.observations.len();
        let points: Vec<&[f64]> = self.observations.iter().map(|o| o.params.as_slice()).collect();

        let mut k = vec![0.0; n * n];
        for i in 0..n {
            for j in i..n {
                let value = self.kernel(points[i], points[j]);
                k[i * n + j] = value;
                k[j * n + i] = value;
            }
            k[i * n + i] += self.config.noise;
        }

        let chol = match matrix::cholesky(&k, n) {
            Ok(l) => l,
            Err(first) => {
                // Duplicate parameter vectors make K rank-deficient; a
                // small diagonal jitter usually restores definiteness.
                let trace: f64 = (0..n).map(|i| k[i * n + i]).sum();
                let jitter = (trace / n as f64).max(1e-12) * 1e-6;
                for i in 0..n {
                    k[i * n + i] += jitter;
                }
                match matrix::cholesky(&k, n) {
                    Ok(l) => {
                        debug!(row = first.row, jitter, "covariance repaired with jitter");
                        l
                    }
                    Err(second) => {
                        warn!(
                            row = second.row,
                            n, "covariance not positive definite after jitter; exploring"
                        );
                        return None;
                    }
                }
            }
        };

        let mean = self.observations.iter().map(|o| o.reward).sum::<f64>() / n as f64;
        let centered: Vec<f64> = self.observations.iter().map(|o| o.reward - mean).collect();
        let alpha = matrix::solve_spd(&chol, &centered, n);

        Some(Posterior {
            chol,
            alpha,
            mean,
            n,
        })
    }

    fn acquisition(&self, posterior: &Posterior, candidate: &[f64]) -> f64 {
        let n = posterior.n;
        let k_star: Vec<f64> = self
            .observations
            .iter()
            .map(|o| self.kernel(&o.params, candidate))
            .collect();

        let mean = posterior.mean + matrix::dot(&k_star, &posterior.alpha);
        let v = matrix::solve_lower(&posterior.chol, &k_star, n);
        let variance =
            (self.kernel(candidate, candidate) + self.config.noise - matrix::dot(&v, &v)).max(0.0);

        mean + self.config.kappa * variance.sqrt()
    }
}
