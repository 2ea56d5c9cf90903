//! Per-submission detail report, written next to the ledger so a
//! participant can see how each sample scored, not just the split
//! means.
//!
//! Layout: filename line, aggregate block per split, per-sample
//! listing, and for registration-rate tasks the averaged
//! precision/recall curves per split.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use kritai_common::{GradeResult, Metric, Split, SplitSummary};
use themis::{layout, Task};

use crate::evaluator::{Aggregate, SampleOutcome};

/// Write the detail report for one evaluated submission. Returns the
/// path it was written to.
pub fn write_detail_report(
    tasks_dir: &Path,
    task: &Task,
    user: &str,
    stored_filename: &str,
    claimed_at: DateTime<Local>,
    outcomes: &[SampleOutcome],
    aggregate: &Aggregate,
) -> GradeResult<PathBuf> {
    let dir = layout::detail_dir(tasks_dir, &task.id);
    fs::create_dir_all(&dir)?;
    let path = dir.join(format!(
        "{user}_{}.csv",
        claimed_at.format("%Y%m%d_%H%M%S")
    ));

    let mut body = String::new();
    let _ = writeln!(body, "filename,{stored_filename}\n");

    write_aggregate_block(&mut body, task.metric, aggregate);
    body.push('\n');
    write_sample_block(&mut body, task.metric, outcomes);

    if task.metric == Metric::RegistrationRate {
        for (split, curve) in &aggregate.mean_curves {
            write_curve_block(&mut body, *split, curve);
        }
    }

    fs::write(&path, body)?;
    tracing::info!("wrote detail report {}", path.display());
    Ok(path)
}

fn write_aggregate_block(body: &mut String, metric: Metric, aggregate: &Aggregate) {
    let columns = match metric {
        Metric::Accuracy => "true,false,accuracy",
        Metric::Mae => "MAE",
        Metric::RegistrationRate => "RegistrationRate",
    };
    let _ = writeln!(body, "type,num_data,{columns}");

    for split in Split::ALL {
        match (metric, aggregate.scores.get(split)) {
            (Metric::Accuracy, summary) => {
                // Every split gets a row, scored or not.
                let (matched, mismatched) = match summary {
                    Some(&SplitSummary::Accuracy {
                        matched,
                        mismatched,
                    }) => (matched, mismatched),
                    _ => (0, 0),
                };
                let num_data = matched + mismatched;
                let accuracy = match summary.and_then(SplitSummary::value) {
                    Some(value) => value.to_string(),
                    None => "-".to_string(),
                };
                let _ = writeln!(body, "{split},{num_data},{matched},{mismatched},{accuracy}");
            }
            (
                Metric::Mae,
                Some(&SplitSummary::Mae { total, count }),
            )
            | (
                Metric::RegistrationRate,
                Some(&SplitSummary::RegistrationRate { total, count }),
            ) if count > 0 => {
                let _ = writeln!(body, "{split},{count},{}", total / f64::from(count));
            }
            _ => {}
        }
    }
}

fn write_sample_block(body: &mut String, metric: Metric, outcomes: &[SampleOutcome]) {
    match metric {
        Metric::Accuracy => {
            let _ = writeln!(body, "type,filename,correct,answer,check");
            for o in outcomes {
                let check = if o.value == 1.0 { 1 } else { 0 };
                let _ = writeln!(
                    body,
                    "{},{},{},{},{check}",
                    o.split,
                    sanitize(&o.label),
                    o.expected,
                    o.actual
                );
            }
        }
        Metric::Mae => {
            let _ = writeln!(body, "type,filename,correct,answer,abs_error");
            for o in outcomes {
                let _ = writeln!(
                    body,
                    "{},{},{},{},{}",
                    o.split,
                    sanitize(&o.label),
                    o.expected,
                    o.actual,
                    o.value
                );
            }
        }
        Metric::RegistrationRate => {
            let _ = writeln!(body, "type,index,RegistrationRate");
            let mut index_per_split = [0usize; 3];
            for o in outcomes {
                let index = &mut index_per_split[o.split as usize];
                let _ = writeln!(body, "{},{index},{}", o.split, o.value);
                *index += 1;
            }
        }
    }
}

/// Averaged P/R curve for one split: one row per percentage point
/// revealed, one column per class, trailing comma per cell.
fn write_curve_block(body: &mut String, split: Split, curve: &crate::active::PrCurve) {
    let classes = curve.first().map_or(0, |p| p.precision.len());

    body.push('\n');
    let _ = writeln!(body, "detail,{split}");

    body.push_str("RegistrationRate,");
    for class in 0..classes {
        let _ = write!(body, "precision-{class},");
    }
    body.push('\n');
    for (percent, point) in curve.iter().enumerate() {
        let _ = write!(body, "{percent},");
        for value in &point.precision {
            let _ = write!(body, "{value:.3},");
        }
        body.push('\n');
    }

    for class in 0..classes {
        let _ = write!(body, "recall-{class},");
    }
    body.push('\n');
    for (percent, point) in curve.iter().enumerate() {
        let _ = write!(body, "{percent},");
        for value in &point.recall {
            let _ = write!(body, "{value:.3},");
        }
        body.push('\n');
    }
}

fn sanitize(cell: &str) -> String {
    cell.replace(',', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    use kritai_common::{
        AnswerValueType, InputDataType, SubmissionScores, TaskType,
    };

    use crate::active::PrPoint;

    fn test_task(metric: Metric) -> Task {
        Task {
            id: "task-r".into(),
            name: "Report".into(),
            explanation: String::new(),
            start_date: chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end_date: chrono::NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            answer_value_type: AnswerValueType::Integer,
            metric,
            input_data_type: InputDataType::Vector,
            multi_input_data: false,
            task_type: TaskType::Quest,
            goal: 0.9,
            timelimit_per_data: 1.0,
            suspend: false,
        }
    }

    fn outcome(split: Split, label: &str, value: f64) -> SampleOutcome {
        SampleOutcome {
            split,
            label: label.into(),
            expected: "1".into(),
            actual: "1.5".into(),
            value,
            curve: None,
        }
    }

    #[test]
    fn mae_report_has_aggregate_then_sample_sections() {
        let dir = tempfile::tempdir().unwrap();
        let task = test_task(Metric::Mae);
        let mut scores = SubmissionScores::default();
        scores.set(
            Split::Valid,
            SplitSummary::Mae {
                total: 1.5,
                count: 3,
            },
        );
        let aggregate = Aggregate {
            scores,
            mean_curves: Vec::new(),
        };

        let claimed = chrono::Local.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        let path = write_detail_report(
            dir.path(),
            &task,
            "alice",
            "alice_task-r_20260301_093000_model.py",
            claimed,
            &[outcome(Split::Valid, "a.csv", 0.5)],
            &aggregate,
        )
        .unwrap();

        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("alice_20260301_093000"));
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.starts_with(
            "filename,alice_task-r_20260301_093000_model.py\n\n\
             type,num_data,MAE\nvalid,3,0.5\n\n\
             type,filename,correct,answer,abs_error\nvalid,a.csv,1,1.5,0.5\n"
        ));
    }

    #[test]
    fn accuracy_report_lists_every_split() {
        let dir = tempfile::tempdir().unwrap();
        let task = test_task(Metric::Accuracy);
        let mut scores = SubmissionScores::default();
        scores.set(
            Split::Train,
            SplitSummary::Accuracy {
                matched: 3,
                mismatched: 1,
            },
        );
        let aggregate = Aggregate {
            scores,
            mean_curves: Vec::new(),
        };

        let claimed = chrono::Local.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        let path = write_detail_report(
            dir.path(),
            &task,
            "alice",
            "stored.py",
            claimed,
            &[outcome(Split::Train, "a,b.csv", 1.0)],
            &aggregate,
        )
        .unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("type,num_data,true,false,accuracy\n"));
        assert!(body.contains("train,4,3,1,0.75\n"));
        // Splits with no samples still get a row with a dash.
        assert!(body.contains("test,0,0,0,-\n"));
        assert!(body.contains("type,filename,correct,answer,check\n"));
        // Commas in sample labels cannot break the CSV.
        assert!(body.contains("train,a-b.csv,1,1.5,1\n"));
    }

    #[test]
    fn registration_report_renders_per_percent_curves() {
        let dir = tempfile::tempdir().unwrap();
        let task = test_task(Metric::RegistrationRate);
        let point = PrPoint {
            precision: vec![1.0, 0.5],
            recall: vec![0.25, 1.0],
        };
        let mut scores = SubmissionScores::default();
        scores.set(
            Split::Train,
            SplitSummary::RegistrationRate {
                total: 0.5,
                count: 2,
            },
        );
        let aggregate = Aggregate {
            scores,
            mean_curves: vec![(Split::Train, vec![point.clone(), point])],
        };

        let claimed = chrono::Local.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let path = write_detail_report(
            dir.path(),
            &task,
            "bob",
            "bob_task-r_20260302_000000_al.py",
            claimed,
            &[
                outcome(Split::Train, "a.csv", 0.2),
                outcome(Split::Train, "b.csv", 0.3),
            ],
            &aggregate,
        )
        .unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("type,num_data,RegistrationRate\ntrain,2,0.25\n"));
        // Per-problem rows count per split.
        assert!(body.contains("type,index,RegistrationRate\ntrain,0,0.2\ntrain,1,0.3\n"));
        // Curve block: header row, then one row per percentage point.
        assert!(body.contains("\ndetail,train\nRegistrationRate,precision-0,precision-1,\n"));
        assert!(body.contains("0,1.000,0.500,\n1,1.000,0.500,\n"));
        assert!(body.contains("recall-0,recall-1,\n0,0.250,1.000,\n"));
    }
}
