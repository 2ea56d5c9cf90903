//! Active-learning evaluation: replay a submitted label-acquisition
//! order and measure how much of the pool must be revealed before the
//! per-class precision and recall floors are both met.
//!
//! The classifier is refit from scratch every 5 revealed elements (and
//! at the final state) rather than updated incrementally; recorded
//! curves depend on this cadence, so it is kept as-is.

use kritai_common::{GradeError, GradeResult, INVALID_SCORE};

/// Refit/score cadence while replaying the acquisition order
const REVEAL_BATCH: usize = 5;

/// Per-class precision and recall at one point of the replay
#[derive(Debug, Clone, PartialEq)]
pub struct PrPoint {
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
}

impl PrPoint {
    /// Both floors met for every class
    fn meets(&self, goal: f64) -> bool {
        let min_p = self.precision.iter().cloned().fold(f64::INFINITY, f64::min);
        let min_r = self.recall.iter().cloned().fold(f64::INFINITY, f64::min);
        min_p >= goal && min_r >= goal
    }
}

/// Precision/recall per percentage point revealed (0..=100), filled
/// carry-forward between scored states
pub type PrCurve = Vec<PrPoint>;

/// Per-class precision and recall with the zero-division convention of
/// the grader: an empty denominator scores 1.0.
pub fn precision_recall(truth: &[i64], estimated: &[i64], num_class: usize) -> PrPoint {
    let mut tp = vec![0u32; num_class];
    let mut fp = vec![0u32; num_class];
    let mut fn_ = vec![0u32; num_class];

    for (&gt, &est) in truth.iter().zip(estimated.iter()) {
        if gt == est {
            if let Ok(c) = usize::try_from(gt) {
                if c < num_class {
                    tp[c] += 1;
                }
            }
        } else {
            if let Ok(c) = usize::try_from(est) {
                if c < num_class {
                    fp[c] += 1;
                }
            }
            if let Ok(c) = usize::try_from(gt) {
                if c < num_class {
                    fn_[c] += 1;
                }
            }
        }
    }

    let ratio = |num: u32, denom: u32| {
        if denom == 0 {
            1.0
        } else {
            f64::from(num) / f64::from(denom)
        }
    };
    PrPoint {
        precision: (0..num_class).map(|c| ratio(tp[c], tp[c] + fp[c])).collect(),
        recall: (0..num_class).map(|c| ratio(tp[c], tp[c] + fn_[c])).collect(),
    }
}

fn squared_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum()
}

/// 1-nearest-neighbor label for one query over the labeled rows.
/// Ties resolve to the earliest row.
fn nearest_label(rows: &[Vec<f32>], labels: &[i64], query: &[f32]) -> i64 {
    let mut best = 0usize;
    let mut best_dist = f64::INFINITY;
    for (index, row) in rows.iter().enumerate() {
        let dist = squared_distance(row, query);
        if dist < best_dist {
            best_dist = dist;
            best = index;
        }
    }
    labels[best]
}

fn classify(rows: &[Vec<f32>], labels: &[i64], pool: &[Vec<f32>]) -> Vec<i64> {
    if labels.is_empty() {
        // No labeled data yet: everything is called class 0.
        return vec![0; pool.len()];
    }
    pool.iter()
        .map(|query| nearest_label(rows, labels, query))
        .collect()
}

/// Replay a registration order over the pool. Returns the fraction of
/// the pool revealed when both floors first hold (or
/// [`INVALID_SCORE`] when they never do) plus the diagnostic curve.
pub fn evaluate_active_learning(
    num_class: usize,
    initial_rows: &[Vec<f32>],
    initial_labels: &[i64],
    pool: &[Vec<f32>],
    pool_labels: &[i64],
    order: &[usize],
    goal: f64,
) -> GradeResult<(f64, Option<PrCurve>)> {
    let total = order.len();
    for &index in order {
        if index >= pool.len() {
            return Err(GradeError::Shape(format!(
                "registration order index {index} is out of range"
            )));
        }
    }

    let mut rows = initial_rows.to_vec();
    let mut labels = initial_labels.to_vec();
    let mut curve: PrCurve = Vec::new();
    let mut rate = INVALID_SCORE;

    for revealed in 0..=total {
        if revealed % REVEAL_BATCH == 0 || revealed == total {
            let estimated = classify(&rows, &labels, pool);
            let point = precision_recall(pool_labels, &estimated, num_class);

            if revealed == 0 {
                curve.push(point.clone());
            } else {
                let percent = revealed * 100 / total;
                // Carry the last scored state forward to fill the gap.
                let carried = curve.last().cloned().unwrap_or_else(|| point.clone());
                while curve.len() < percent + 1 {
                    curve.push(carried.clone());
                }
                curve[percent] = point.clone();
            }

            if rate < 0.0 && point.meets(goal) {
                tracing::debug!("precision/recall floors met at {revealed} / {total}");
                rate = if total == 0 {
                    0.0
                } else {
                    revealed as f64 / total as f64
                };
            }
        }

        if revealed < total {
            let addition = order[revealed];
            rows.push(pool[addition].clone());
            labels.push(pool_labels[addition]);
        }
    }

    let curve = if curve.is_empty() { None } else { Some(curve) };
    Ok((rate, curve))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_division_scores_one() {
        // Everything is called class 0; class 1 has no predictions and
        // no occurrences, so both its ratios default to 1.0.
        let point = precision_recall(&[0, 0, 0], &[0, 0, 0], 2);
        assert_eq!(point.precision, vec![1.0, 1.0]);
        assert_eq!(point.recall, vec![1.0, 1.0]);
    }

    #[test]
    fn mixed_predictions_score_per_class() {
        // gt:  0 0 1 1, est: 0 1 1 1
        let point = precision_recall(&[0, 0, 1, 1], &[0, 1, 1, 1], 2);
        assert_eq!(point.precision[0], 1.0); // 1 tp, 0 fp
        assert_eq!(point.recall[0], 0.5); // 1 of 2 found
        assert!((point.precision[1] - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(point.recall[1], 1.0);
    }

    #[test]
    fn separable_pool_meets_goal_immediately() {
        // The initial labeled pair already classifies the pool
        // perfectly, so the floors hold with nothing revealed.
        let pool = vec![vec![0.1], vec![0.2], vec![9.9], vec![9.8]];
        let pool_labels = vec![0, 0, 1, 1];
        let (rate, curve) = evaluate_active_learning(
            2,
            &[vec![0.0], vec![10.0]],
            &[0, 1],
            &pool,
            &pool_labels,
            &[0, 1, 2, 3],
            0.9,
        )
        .unwrap();
        assert_eq!(rate, 0.0);
        let curve = curve.unwrap();
        assert_eq!(curve.len(), 101);
        assert_eq!(curve[100].precision, vec![1.0, 1.0]);
    }

    #[test]
    fn unreachable_goal_reports_sentinel() {
        // Identical feature rows with conflicting labels cannot reach
        // perfect precision.
        let pool = vec![vec![1.0], vec![1.0]];
        let pool_labels = vec![0, 1];
        let (rate, _) = evaluate_active_learning(
            2,
            &[vec![1.0]],
            &[0],
            &pool,
            &pool_labels,
            &[0, 1],
            1.0,
        )
        .unwrap();
        assert_eq!(rate, INVALID_SCORE);
    }

    #[test]
    fn empty_initial_pool_predicts_class_zero() {
        // With nothing labeled, everything is called class 0; a pool
        // that is entirely class 0 meets any floor at zero reveals.
        let pool = vec![vec![0.0], vec![0.5]];
        let (rate, _) =
            evaluate_active_learning(1, &[], &[], &pool, &[0, 0], &[0, 1], 1.0).unwrap();
        assert_eq!(rate, 0.0);
    }

    #[test]
    fn out_of_range_order_is_a_shape_error() {
        let pool = vec![vec![0.0]];
        let err = evaluate_active_learning(1, &[], &[], &pool, &[0], &[3], 0.5).unwrap_err();
        assert!(matches!(err, GradeError::Shape(_)));
    }
}
