//! Submission evaluation: per split, load the samples, drive the bound
//! scoring routine under the per-sample deadline, score each answer,
//! and fold the outcomes into the ledger summaries.
//!
//! The train split keeps manifest order; valid and test are shuffled
//! with a generator seeded from the claim time, so one evaluation sees
//! one fixed order but successive submissions do not.

use std::path::Path;

use chrono::{DateTime, Local};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use kritai_common::{
    AnswerValue, GradeError, GradeResult, GroundTruth, InputPayload, Metric, SampleParams, Split,
    SplitSummary, SubmissionScores, TaskType,
};
use themis::{layout, Task};

use crate::active::{evaluate_active_learning, PrCurve, PrPoint};
use crate::dataset::{read_split, Sample};
use crate::executor::{check_image_dims, SplitRunner};
use crate::routine::{RoutineRegistry, SubmissionKey};

/// One scored sample
#[derive(Debug, Clone)]
pub struct SampleOutcome {
    pub split: Split,
    /// Input path(s) joined for display, empty for inline vectors
    pub label: String,
    /// Ground truth rendered for the detail report, `-` for images
    pub expected: String,
    /// Answer rendered for the detail report, `-` for images/orders
    pub actual: String,
    /// Per-sample metric value: 1/0 match, absolute error, or
    /// registration rate (which may be the invalid sentinel)
    pub value: f64,
    /// Precision/recall curve of an active-learning sample
    pub curve: Option<PrCurve>,
}

/// Folded outcomes of one submission
#[derive(Debug, Clone)]
pub struct Aggregate {
    pub scores: SubmissionScores,
    /// Pointwise mean precision/recall curve per split that produced
    /// active-learning curves
    pub mean_curves: Vec<(Split, PrCurve)>,
}

/// Evaluate one claimed submission over its task's splits: train and
/// valid always, test only for contest tasks.
///
/// Any error aborts the whole evaluation; an empty usable split yields
/// no outcomes at all, which the caller records as a failed run.
pub async fn evaluate_submission(
    task: &Task,
    tasks_dir: &Path,
    registry: &RoutineRegistry,
    submission: &SubmissionKey,
    claimed_at: DateTime<Local>,
) -> GradeResult<Vec<SampleOutcome>> {
    let binding = registry.resolve(submission);
    let mut outcomes = Vec::new();

    for split in Split::ALL {
        // Only contests have a held-out test split; quests score on
        // train and valid alone.
        if split == Split::Test && task.task_type != TaskType::Contest {
            continue;
        }
        let manifest = layout::split_manifest_path(tasks_dir, &task.id, split.name());
        let mut data = read_split(task, &manifest)?;
        if data.samples.is_empty() {
            tracing::warn!("task {}: split {split} has no usable samples", task.id);
            return Ok(Vec::new());
        }
        if split != Split::Train {
            let mut rng = StdRng::seed_from_u64(claimed_at.timestamp() as u64);
            data.samples.shuffle(&mut rng);
        }

        let routine = binding.bind(submission)?;
        let mut runner = SplitRunner::new(routine, task.timelimit_per_data);
        let run = runner.run(&data.samples, task.answer_value_type).await;
        runner.shutdown().await;
        let (answers, elapsed) = run?;
        tracing::debug!(
            "task {}: split {split} ran {} samples in {elapsed:.2} s",
            task.id,
            answers.len()
        );

        for (sample, answer) in data.samples.iter().zip(answers.iter()) {
            outcomes.push(score_sample(task, split, sample, answer)?);
        }
    }

    Ok(outcomes)
}

fn score_sample(
    task: &Task,
    split: Split,
    sample: &Sample,
    answer: &AnswerValue,
) -> GradeResult<SampleOutcome> {
    let label = sample.filenames.join(" ");
    let expected = render_truth(&sample.truth);
    let actual = render_answer(answer);
    let outcome = |value, curve| SampleOutcome {
        split,
        label: label.clone(),
        expected: expected.clone(),
        actual: actual.clone(),
        value,
        curve,
    };

    match task.metric {
        Metric::Accuracy => {
            if let (GroundTruth::Image(truth), AnswerValue::Image(answer)) =
                (&sample.truth, answer)
            {
                check_image_dims(truth, answer)?;
            }
            let value = if sample.truth.matches(answer) { 1.0 } else { 0.0 };
            Ok(outcome(value, None))
        }
        Metric::Mae => {
            let value = match (&sample.truth, answer) {
                (GroundTruth::Integer(truth), AnswerValue::Integer(answer)) => {
                    (truth - answer).abs() as f64
                }
                (GroundTruth::Real(truth), AnswerValue::Real(answer)) => (truth - answer).abs(),
                (GroundTruth::Image(truth), AnswerValue::Image(answer)) => {
                    check_image_dims(truth, answer)?;
                    truth.mean_abs_diff(answer).ok_or_else(|| {
                        GradeError::Shape("ground-truth image is empty".into())
                    })?
                }
                _ => {
                    return Err(GradeError::Shape(
                        "answer kind does not match the ground truth".into(),
                    ))
                }
            };
            Ok(outcome(value, None))
        }
        Metric::RegistrationRate => {
            let order = match answer {
                AnswerValue::Order(order) => order,
                _ => return Err(GradeError::Shape("answer is not an index list".into())),
            };
            let pool = match &sample.input {
                InputPayload::VectorSet(rows) => rows,
                _ => return Err(GradeError::Shape("input is not a row set".into())),
            };
            let pool_labels = match &sample.truth {
                GroundTruth::Labels(labels) => labels,
                _ => return Err(GradeError::Shape("ground truth is not a label list".into())),
            };
            let (initial, initial_labels, goal) = match &sample.params {
                SampleParams::ActiveLearning { pool, labels, goal } => (pool, labels, *goal),
                _ => {
                    return Err(GradeError::Shape(
                        "sample carries no training payload".into(),
                    ))
                }
            };
            if pool.len() != pool_labels.len() {
                return Err(GradeError::Shape(
                    "pool and label list lengths differ".into(),
                ));
            }
            let num_class = num_classes(initial_labels);
            let (rate, curve) = evaluate_active_learning(
                num_class,
                initial,
                initial_labels,
                pool,
                pool_labels,
                order,
                goal,
            )?;
            Ok(outcome(rate, curve))
        }
    }
}

fn render_truth(truth: &GroundTruth) -> String {
    match truth {
        GroundTruth::Integer(v) => v.to_string(),
        GroundTruth::Real(v) => v.to_string(),
        GroundTruth::Image(_) | GroundTruth::Labels(_) => "-".to_string(),
    }
}

fn render_answer(answer: &AnswerValue) -> String {
    match answer {
        AnswerValue::Integer(v) => v.to_string(),
        AnswerValue::Real(v) => v.to_string(),
        AnswerValue::Image(_) | AnswerValue::Order(_) => "-".to_string(),
    }
}

/// The class set is defined by the initial labeled pool; labels that
/// only occur in the evaluation pool do not widen the P/R vectors.
fn num_classes(initial_labels: &[i64]) -> usize {
    let max = initial_labels.iter().copied().max().unwrap_or(0).max(0);
    max as usize + 1
}

/// Fold the per-sample outcomes into one summary per split.
///
/// Accuracy always reports all three splits so the ledger columns stay
/// populated; the other metrics report only the splits that actually
/// produced outcomes. Registration-rate means keep the invalid
/// sentinel values of unachieved samples.
pub fn aggregate(outcomes: &[SampleOutcome], metric: Metric) -> Aggregate {
    let mut scores = SubmissionScores::default();
    if metric == Metric::Accuracy {
        for split in Split::ALL {
            scores.set(
                split,
                SplitSummary::Accuracy {
                    matched: 0,
                    mismatched: 0,
                },
            );
        }
    }

    for outcome in outcomes {
        let updated = match (metric, scores.get(outcome.split).copied()) {
            (Metric::Accuracy, Some(SplitSummary::Accuracy { matched, mismatched })) => {
                if outcome.value > 0.0 {
                    SplitSummary::Accuracy {
                        matched: matched + 1,
                        mismatched,
                    }
                } else {
                    SplitSummary::Accuracy {
                        matched,
                        mismatched: mismatched + 1,
                    }
                }
            }
            (Metric::Mae, prior) => {
                let (total, count) = match prior {
                    Some(SplitSummary::Mae { total, count }) => (total, count),
                    _ => (0.0, 0),
                };
                SplitSummary::Mae {
                    total: total + outcome.value,
                    count: count + 1,
                }
            }
            (Metric::RegistrationRate, prior) => {
                let (total, count) = match prior {
                    Some(SplitSummary::RegistrationRate { total, count }) => (total, count),
                    _ => (0.0, 0),
                };
                SplitSummary::RegistrationRate {
                    total: total + outcome.value,
                    count: count + 1,
                }
            }
            (Metric::Accuracy, _) => continue,
        };
        scores.set(outcome.split, updated);
    }

    Aggregate {
        scores,
        mean_curves: mean_curves(outcomes),
    }
}

fn mean_curves(outcomes: &[SampleOutcome]) -> Vec<(Split, PrCurve)> {
    let mut result = Vec::new();
    for split in Split::ALL {
        let curves: Vec<&PrCurve> = outcomes
            .iter()
            .filter(|o| o.split == split)
            .filter_map(|o| o.curve.as_ref())
            .collect();
        if curves.is_empty() {
            continue;
        }
        let length = curves.iter().map(|c| c.len()).max().unwrap_or(0);
        let mut mean = Vec::with_capacity(length);
        for index in 0..length {
            let points: Vec<&PrPoint> = curves.iter().filter_map(|c| c.get(index)).collect();
            mean.push(mean_point(&points));
        }
        result.push((split, mean));
    }
    result
}

fn mean_point(points: &[&PrPoint]) -> PrPoint {
    let classes = points.iter().map(|p| p.precision.len()).max().unwrap_or(0);
    let average = |select: fn(&PrPoint) -> &Vec<f64>, class: usize| {
        let values: Vec<f64> = points
            .iter()
            .filter_map(|p| select(p).get(class).copied())
            .collect();
        values.iter().sum::<f64>() / values.len().max(1) as f64
    };
    PrPoint {
        precision: (0..classes).map(|c| average(|p| &p.precision, c)).collect(),
        recall: (0..classes).map(|c| average(|p| &p.recall, c)).collect(),
    }
}
