//! One claimed submission through the grading pipeline.
//!
//! The scan loop raises the in-progress marker via
//! [`begin_submission`] before handing off to a worker, so the next
//! cycle already sees the user as busy; the pipeline then evaluates,
//! writes the ledger row (success or failure) and detail report, and
//! always lowers the marker and rewrites the freshness stamp.

use std::path::Path;

use chrono::{DateTime, Local};

use kritai_common::GradeError;
use rhadamanthus::{aggregate, evaluate_submission, RoutineRegistry, SubmissionKey};
use themis::{layout, ledger, Task};

use crate::scanner::ClaimedSubmission;

/// Raise the in-progress marker and refresh the freshness stamp.
/// Must run in the scan loop, synchronously after a claim: the marker
/// is what stops the next cycle from claiming a second file for the
/// same user while this one is still being graded.
pub fn begin_submission(tasks_dir: &Path, task_id: &str, user: &str, claimed_at: DateTime<Local>) {
    if let Err(e) = ledger::create_marker(tasks_dir, task_id, user) {
        tracing::warn!("could not raise marker for {user}: {e}");
    }
    if let Err(e) = ledger::update_timestamp(tasks_dir, task_id, claimed_at.naive_local()) {
        tracing::warn!("freshness stamp for task {task_id} failed: {e}");
    }
}

pub async fn process_submission(
    tasks_dir: &Path,
    task: &Task,
    registry: &RoutineRegistry,
    claimed: &ClaimedSubmission,
    claimed_at: DateTime<Local>,
) {
    let user = &claimed.user;
    let submission = SubmissionKey {
        participant: user.clone(),
        task_id: task.id.clone(),
        module_path: claimed.module_path.clone(),
    };
    let ledger_path = layout::user_ledger_path(tasks_dir, &task.id, user);
    let row_time = claimed_at.naive_local();

    match evaluate_submission(task, tasks_dir, registry, &submission, claimed_at).await {
        Ok(outcomes) if outcomes.is_empty() => {
            let message = GradeError::Dataset("no usable samples".into()).ledger_message();
            ledger::append_row(
                &ledger_path,
                task.metric,
                row_time,
                &claimed.stored_name,
                None,
                &message,
                &claimed.memo,
            );
        }
        Ok(outcomes) => {
            let folded = aggregate(&outcomes, task.metric);
            ledger::append_row(
                &ledger_path,
                task.metric,
                row_time,
                &claimed.stored_name,
                Some(&folded.scores),
                "",
                &claimed.memo,
            );
            if let Err(e) = rhadamanthus::report::write_detail_report(
                tasks_dir,
                task,
                user,
                &claimed.stored_name,
                claimed_at,
                &outcomes,
                &folded,
            ) {
                tracing::error!("detail report for {} failed: {e}", claimed.stored_name);
            }
        }
        Err(e) => {
            tracing::warn!("submission {} failed: {e}", claimed.stored_name);
            ledger::append_row(
                &ledger_path,
                task.metric,
                row_time,
                &claimed.stored_name,
                None,
                &e.ledger_message(),
                &claimed.memo,
            );
        }
    }

    ledger::remove_marker(tasks_dir, &task.id, user);
    if let Err(e) = ledger::update_timestamp(tasks_dir, &task.id, Local::now().naive_local()) {
        tracing::warn!("freshness stamp for task {} failed: {e}", task.id);
    }
}
