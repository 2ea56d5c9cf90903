//! Leaderboard selection: the deterministic "best result" comparator.
//!
//! All metrics are normalized so that larger is better (MAE and
//! RegistrationRate values are negated), turning the five-level
//! tie-break chain into one lexicographic comparison:
//! goal-achieved on test, valid, train; then raw value on test, valid,
//! train; then submission datetime (latest wins). While a contest is
//! still open the test dimension is omitted entirely so concealed test
//! results cannot influence the board.

use std::cmp::Ordering;

use chrono::NaiveDateTime;

use kritai_common::INVALID_SCORE;

use crate::ledger::ResultRow;
use crate::task::Task;

/// One row projected onto the normalized comparison axes
#[derive(Debug, Clone, Copy)]
struct RankKey {
    test_achieved: bool,
    valid_achieved: bool,
    train_achieved: bool,
    test: f64,
    valid: f64,
    train: f64,
    datetime: NaiveDateTime,
    include_test: bool,
}

impl RankKey {
    fn project(row: &ResultRow, task: &Task, include_test: bool) -> RankKey {
        let sign = if task.metric.larger_is_better() {
            1.0
        } else {
            -1.0
        };
        let goal = task.goal * sign;
        let train = row.train * sign;
        let valid = row.valid * sign;
        // An invalid test value never achieves the goal and loses any
        // value comparison.
        let test = if row.test >= 0.0 {
            row.test * sign
        } else {
            f64::NEG_INFINITY
        };

        RankKey {
            test_achieved: include_test && row.test >= 0.0 && test >= goal,
            valid_achieved: valid >= goal,
            train_achieved: train >= goal,
            test,
            valid,
            train,
            datetime: row.datetime,
            include_test,
        }
    }

    fn compare(&self, other: &RankKey) -> Ordering {
        let mut ordering = Ordering::Equal;
        if self.include_test {
            ordering = self.test_achieved.cmp(&other.test_achieved);
        }
        ordering
            .then_with(|| self.valid_achieved.cmp(&other.valid_achieved))
            .then_with(|| self.train_achieved.cmp(&other.train_achieved))
            .then_with(|| {
                if self.include_test {
                    self.test.total_cmp(&other.test)
                } else {
                    Ordering::Equal
                }
            })
            .then_with(|| self.valid.total_cmp(&other.valid))
            .then_with(|| self.train.total_cmp(&other.train))
            .then_with(|| self.datetime.cmp(&other.datetime))
    }
}

/// Select the best of a participant's result rows for a task, or
/// `None` when no row has valid train and valid values. Pure and
/// side-effect-free; re-running over the same rows yields the same
/// selection.
pub fn best_result<'a>(rows: &'a [ResultRow], task: &Task, now: NaiveDateTime) -> Option<&'a ResultRow> {
    // While a contest runs, test results stay concealed and must not
    // participate in the comparison at all.
    let include_test = !task.in_contest_window(now);

    rows.iter()
        .filter(|row| row.has_valid_scores())
        .max_by(|a, b| {
            RankKey::project(a, task, include_test)
                .compare(&RankKey::project(b, task, include_test))
        })
}
