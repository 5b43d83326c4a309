//! Priority scheduler: turns per-item learning states and scores into an
//! ordered study queue mixing unseen and due-for-review items.
//!
//! Pure functions over snapshots; no shared state, no concurrency concerns.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::config::SchedulerConfig;
use crate::types::{ItemLearningState, ItemScore, ItemState};

#[derive(Debug, Clone)]
struct Candidate {
    item_id: String,
    is_new: bool,
    overdue_days: f64,
    error_rate: f64,
    total_score: Option<f64>,
    priority: f64,
}

/// Share of unseen items for a queue, chosen from recent accuracy.
pub fn new_item_ratio(recent_accuracy: f64, config: &SchedulerConfig) -> f64 {
    if recent_accuracy >= config.high_accuracy_threshold {
        config.high_accuracy_ratio
    } else if recent_accuracy <= config.low_accuracy_threshold {
        config.low_accuracy_ratio
    } else {
        config.default_ratio
    }
}

/// Error-rate signal: doubles the raw rate below 50% error, saturates above.
fn error_rate_signal(error_rate: f64) -> f64 {
    (2.0 * error_rate.clamp(0.0, 1.0)).min(1.0)
}

/// Score signal: full weight below score 40, decaying linearly to 0 at 100.
fn score_signal(total_score: f64) -> f64 {
    if total_score < 40.0 {
        1.0
    } else {
        ((100.0 - total_score) / 60.0).clamp(0.0, 1.0)
    }
}

fn priority_score(candidate: &Candidate, config: &SchedulerConfig) -> f64 {
    let w = &config.weights;
    let mut priority = 0.0;
    if candidate.is_new {
        priority += w.new_item;
    }
    priority += w.error_rate * error_rate_signal(candidate.error_rate);
    priority += w.overdue_time
        * (candidate.overdue_days / config.overdue_saturation_days).min(1.0);
    // Items with no score yet get the full score weight, like unscored
    // due words in the legacy selection path.
    priority += w.item_score * candidate.total_score.map(score_signal).unwrap_or(1.0);
    priority
}

/// Stable multi-key ordering: NEW first, then overdue, then error rate
/// above 50%, then priority descending, item id as the final tie-break.
fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    b.is_new
        .cmp(&a.is_new)
        .then_with(|| (b.overdue_days > 0.0).cmp(&(a.overdue_days > 0.0)))
        .then_with(|| (b.error_rate > 0.5).cmp(&(a.error_rate > 0.5)))
        .then_with(|| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.item_id.cmp(&b.item_id))
}

/// Builds the study queue for one learner.
///
/// Deterministic: identical states, scores, target, accuracy and clock
/// always produce the identical ordered output.
pub fn build_queue(
    states: &[ItemLearningState],
    scores: &HashMap<String, ItemScore>,
    target_count: usize,
    recent_accuracy: f64,
    now_ms: i64,
    config: &SchedulerConfig,
) -> Vec<String> {
    if target_count == 0 || states.is_empty() {
        return Vec::new();
    }

    let mut new_items: Vec<Candidate> = Vec::new();
    let mut due_items: Vec<Candidate> = Vec::new();

    for state in states {
        let is_new = state.state == ItemState::New;
        if !is_new && !state.is_due(now_ms) {
            continue;
        }

        let score = scores.get(&state.item_id);
        let mut candidate = Candidate {
            item_id: state.item_id.clone(),
            is_new,
            overdue_days: if is_new { 0.0 } else { state.overdue_days(now_ms) },
            error_rate: score.map(|s| s.error_rate()).unwrap_or(0.0),
            total_score: score.map(|s| s.total_score),
            priority: 0.0,
        };
        candidate.priority = priority_score(&candidate, config);

        if is_new {
            new_items.push(candidate);
        } else {
            due_items.push(candidate);
        }
    }

    new_items.sort_by(compare);
    due_items.sort_by(compare);

    let ratio = new_item_ratio(recent_accuracy, config);
    let mut new_count = ((target_count as f64 * ratio).round() as usize).min(new_items.len());
    let review_count = target_count.saturating_sub(new_count).min(due_items.len());
    // Review supply fell short: back-fill from the new partition.
    new_count = (target_count - review_count).min(new_items.len());

    let mut queue = Vec::with_capacity(new_count + review_count);
    queue.extend(new_items.into_iter().take(new_count).map(|c| c.item_id));
    queue.extend(due_items.into_iter().take(review_count).map(|c| c.item_id));
    queue
}
