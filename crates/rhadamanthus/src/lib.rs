//! Evaluation engine for Kritai: loads dataset splits, drives the
//! submitted scoring routine inside an isolated worker, aggregates the
//! configured metric, and writes the per-submission detail report.

pub mod active;
pub mod dataset;
pub mod evaluator;
pub mod executor;
pub mod report;
pub mod routine;

pub use evaluator::{aggregate, evaluate_submission, Aggregate, SampleOutcome};
pub use routine::{
    ChildProcessBinding, RoutineBinding, RoutineRegistry, ScoringRoutine, SubmissionKey,
};
