//! Append-only per-participant result ledger, plus the in-progress
//! marker and the freshness timestamp consumed by the presentation
//! tier.
//!
//! Every data row starts with a blank-line separator so that a crash
//! mid-write can only truncate the newest entry, never corrupt prior
//! rows.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use kritai_common::{Metric, Split, SplitSummary, SubmissionScores, INVALID_SCORE};

use crate::layout;

/// Write attempts before giving up on a ledger append
const WRITE_RETRIES: u32 = 3;

/// Datetime recorded for rows whose timestamp cells cannot be parsed
fn fallback_datetime() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1984, 4, 22)
        .expect("static date")
        .and_time(NaiveTime::MIN)
}

fn sanitize_cell(s: &str) -> String {
    s.replace(',', "-").replace(['\r', '\n'], " ")
}

/// Header row (no trailing newline) for a participant ledger
pub fn header_for(metric: Metric) -> String {
    let mut header = String::from("date,time,filename,");
    for split in Split::ALL {
        match metric {
            Metric::Accuracy => {
                header.push_str(&format!("{split}_true,{split}_false,{split}_accuracy,"));
            }
            Metric::Mae => header.push_str(&format!("{split}_MAE,")),
            Metric::RegistrationRate => header.push_str(&format!("{split}RegistrationRate,")),
        }
    }
    header.push_str("message,memo");
    header
}

fn split_cells(metric: Metric, summary: Option<&SplitSummary>) -> String {
    match metric {
        Metric::Accuracy => match summary {
            Some(SplitSummary::Accuracy { matched, mismatched }) => {
                let value = summary
                    .and_then(SplitSummary::value)
                    .map_or_else(|| "-".to_string(), |v| v.to_string());
                format!("{matched},{mismatched},{value},")
            }
            _ => "-,-,-,".to_string(),
        },
        Metric::Mae | Metric::RegistrationRate => match summary.and_then(SplitSummary::value) {
            Some(value) => format!("{value},"),
            None => "-,".to_string(),
        },
    }
}

/// Format one data row, separator first. `scores` is `None` for a
/// failed submission, which gets `-` in every metric cell plus the
/// failure message.
pub fn format_row(
    datetime: NaiveDateTime,
    filename: &str,
    metric: Metric,
    scores: Option<&SubmissionScores>,
    message: &str,
    memo: &str,
) -> String {
    let mut row = String::from("\n");
    row.push_str(&datetime.format("%Y/%m/%d,%H:%M:%S,").to_string());
    row.push_str(&sanitize_cell(filename));
    row.push(',');
    for split in Split::ALL {
        row.push_str(&split_cells(metric, scores.and_then(|s| s.get(split))));
    }
    row.push_str(&sanitize_cell(message));
    row.push(',');
    row.push_str(&sanitize_cell(memo));
    row
}

/// Append one result row, creating the ledger with its header on first
/// write. Bounded retries; a persistent failure is logged and dropped,
/// never propagated into the dispatch loop.
pub fn append_row(
    path: &Path,
    metric: Metric,
    datetime: NaiveDateTime,
    filename: &str,
    scores: Option<&SubmissionScores>,
    message: &str,
    memo: &str,
) -> bool {
    let row = format_row(datetime, filename, metric, scores, message, memo);

    for attempt in 1..=WRITE_RETRIES {
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let fresh = !path.exists();
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            if fresh {
                file.write_all(header_for(metric).as_bytes())?;
            }
            file.write_all(row.as_bytes())?;
            Ok(())
        })();

        match result {
            Ok(()) => return true,
            Err(e) => {
                tracing::error!(
                    "ledger append to {} failed (attempt {attempt}/{WRITE_RETRIES}): {e}",
                    path.display()
                );
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
        }
    }
    false
}

/// One parsed ledger entry. Metric values that were `-` or otherwise
/// unparseable come back as [`INVALID_SCORE`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub datetime: NaiveDateTime,
    pub filename: String,
    pub train: f64,
    pub valid: f64,
    pub test: f64,
    pub message: String,
    pub memo: String,
}

impl ResultRow {
    /// Parse one data row. Column positions depend on the metric:
    /// Accuracy rows carry true/false/value triples per split, the
    /// other metrics one value per split.
    pub fn parse(line: &str, metric: Metric) -> ResultRow {
        let cells: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(',').collect();

        let datetime = match (cells.first(), cells.get(1)) {
            (Some(date), Some(time)) => {
                NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y/%m/%d %H:%M:%S")
                    .unwrap_or_else(|_| fallback_datetime())
            }
            _ => fallback_datetime(),
        };

        let value_at = |index: usize| -> f64 {
            cells
                .get(index)
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(INVALID_SCORE)
        };
        let text_at =
            |index: usize| -> String { cells.get(index).map(|s| s.to_string()).unwrap_or_default() };

        let (train_idx, valid_idx, test_idx) = match metric {
            Metric::Accuracy => (5, 8, 11),
            Metric::Mae | Metric::RegistrationRate => (3, 4, 5),
        };

        ResultRow {
            datetime,
            filename: text_at(2),
            train: value_at(train_idx),
            valid: value_at(valid_idx),
            test: value_at(test_idx),
            message: text_at(test_idx + 1),
            memo: text_at(test_idx + 2),
        }
    }

    /// Rows with an invalid train or valid value never enter ranking
    pub fn has_valid_scores(&self) -> bool {
        self.train >= 0.0 && self.valid >= 0.0
    }
}

/// Read and parse every data row of a participant ledger. The header
/// line and the blank separator lines are skipped. A missing ledger is
/// an empty history, not an error.
pub fn read_rows(path: &Path, metric: Metric) -> Vec<ResultRow> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return Vec::new(),
    };
    raw.lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(|line| ResultRow::parse(line, metric))
        .collect()
}

/// Raise the zero-byte "evaluation in progress" marker for a user
pub fn create_marker(tasks_dir: &Path, task_id: &str, user: &str) -> std::io::Result<()> {
    let path = layout::marker_path(tasks_dir, task_id, user);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    File::create(path)?;
    Ok(())
}

/// Remove the marker unconditionally after a pipeline run. A missing
/// marker is logged, not fatal.
pub fn remove_marker(tasks_dir: &Path, task_id: &str, user: &str) {
    let path = layout::marker_path(tasks_dir, task_id, user);
    if let Err(e) = fs::remove_file(&path) {
        tracing::warn!("could not remove marker {}: {e}", path.display());
    }
}

/// Rewrite the per-task freshness stamp; the presentation tier polls
/// this file instead of re-scanning ledgers.
pub fn update_timestamp(tasks_dir: &Path, task_id: &str, now: NaiveDateTime) -> std::io::Result<()> {
    let dir = layout::output_dir(tasks_dir, task_id);
    fs::create_dir_all(&dir)?;
    fs::write(
        layout::timestamp_path(tasks_dir, task_id),
        now.format("%Y%m%d_%H%M%S_%6f").to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 5, 4)
            .unwrap()
            .and_hms_opt(12, 34, 56)
            .unwrap()
    }

    fn mae_scores() -> SubmissionScores {
        let mut scores = SubmissionScores::default();
        scores.set(
            Split::Train,
            SplitSummary::Mae {
                total: 1.5,
                count: 3,
            },
        );
        scores.set(
            Split::Valid,
            SplitSummary::Mae {
                total: 0.75,
                count: 3,
            },
        );
        scores
    }

    #[test]
    fn header_matches_metric_columns() {
        assert_eq!(
            header_for(Metric::Mae),
            "date,time,filename,train_MAE,valid_MAE,test_MAE,message,memo"
        );
        assert!(header_for(Metric::Accuracy).contains("train_true,train_false,train_accuracy"));
    }

    #[test]
    fn row_round_trips_through_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alice.csv");
        let scores = mae_scores();

        assert!(append_row(
            &path,
            Metric::Mae,
            sample_time(),
            "alice_task_20260504_solution.py",
            Some(&scores),
            "",
            "try 2",
        ));

        let rows = read_rows(&path, Metric::Mae);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.datetime, sample_time());
        assert_eq!(row.filename, "alice_task_20260504_solution.py");
        assert_eq!(row.train, 0.5);
        assert_eq!(row.valid, 0.25);
        assert_eq!(row.test, INVALID_SCORE);
        assert_eq!(row.message, "");
        assert_eq!(row.memo, "try 2");
    }

    #[test]
    fn failure_row_has_dash_cells_and_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bob.csv");
        assert!(append_row(
            &path,
            Metric::Accuracy,
            sample_time(),
            "bob_solution.py",
            None,
            "Processing timed out: sample 3",
            "",
        ));

        let rows = read_rows(&path, Metric::Accuracy);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].train, INVALID_SCORE);
        assert_eq!(rows[0].valid, INVALID_SCORE);
        assert_eq!(rows[0].message, "Processing timed out: sample 3");
    }

    #[test]
    fn torn_row_does_not_corrupt_later_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carol.csv");
        append_row(
            &path,
            Metric::Mae,
            sample_time(),
            "first.py",
            Some(&mae_scores()),
            "",
            "",
        );
        // Simulate a crash mid-write: a trailing partial row with no
        // newline of its own.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"\n2026/05/04,13:00").unwrap();
        }
        append_row(
            &path,
            Metric::Mae,
            sample_time(),
            "second.py",
            Some(&mae_scores()),
            "",
            "",
        );

        let rows = read_rows(&path, Metric::Mae);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].filename, "first.py");
        // The torn row parses as invalid and is excluded from ranking.
        assert!(!rows[1].has_valid_scores());
        assert_eq!(rows[2].filename, "second.py");
    }

    #[test]
    fn commas_in_cells_are_sanitized() {
        let row = format_row(
            sample_time(),
            "a,b.py",
            Metric::Mae,
            None,
            "error: bad, very bad",
            "memo, with comma",
        );
        let parsed = ResultRow::parse(row.trim_start_matches('\n'), Metric::Mae);
        assert_eq!(parsed.filename, "a-b.py");
        assert_eq!(parsed.message, "error: bad- very bad");
        assert_eq!(parsed.memo, "memo- with comma");
    }

    #[test]
    fn marker_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        create_marker(dir.path(), "task-a", "alice").unwrap();
        let marker = layout::marker_path(dir.path(), "task-a", "alice");
        assert!(marker.exists());
        remove_marker(dir.path(), "task-a", "alice");
        assert!(!marker.exists());
    }

    #[test]
    fn timestamp_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        update_timestamp(dir.path(), "task-a", sample_time()).unwrap();
        let stamp = fs::read_to_string(layout::timestamp_path(dir.path(), "task-a")).unwrap();
        assert!(stamp.starts_with("20260504_123456_"));
    }
}
