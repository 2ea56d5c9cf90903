//! Task configuration and the reloadable task registry.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;

use kritai_common::{AnswerValueType, GradeError, GradeResult, InputDataType, Metric, TaskType};

use crate::layout;

/// Immutable per-contest task configuration, loaded from
/// `<tasks>/<id>/task.json`.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub explanation: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub answer_value_type: AnswerValueType,
    pub metric: Metric,
    pub input_data_type: InputDataType,
    /// One sample bundles several input items
    pub multi_input_data: bool,
    pub task_type: TaskType,
    /// Target metric value; comparison direction depends on the metric
    pub goal: f64,
    /// Wall-clock budget in seconds per elementary input unit
    pub timelimit_per_data: f64,
    pub suspend: bool,
}

fn info_str<'a>(info: &'a Value, key: &str) -> GradeResult<&'a str> {
    info.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| GradeError::Config(format!("missing or non-string field '{key}'")))
}

fn parse_date(s: &str, key: &str) -> GradeResult<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| GradeError::Config(format!("invalid {key} '{s}': {e}")))
}

impl Task {
    /// Load a task configuration. Fails with [`GradeError::Config`]
    /// when the file is missing, malformed, or uses an unrecognized
    /// enum value; callers skip such tasks rather than abort.
    pub fn load(tasks_dir: &Path, task_id: &str) -> GradeResult<Task> {
        let path = layout::task_config_path(tasks_dir, task_id);
        let raw = fs::read_to_string(&path)
            .map_err(|e| GradeError::Config(format!("cannot read {}: {e}", path.display())))?;
        let doc: Value = serde_json::from_str(&raw)
            .map_err(|e| GradeError::Config(format!("cannot parse {}: {e}", path.display())))?;
        let info = doc
            .get("info")
            .ok_or_else(|| GradeError::Config(format!("{}: missing 'info' object", path.display())))?;

        let metric_str = info_str(info, "metric")?;
        let metric = Metric::parse(metric_str)
            .ok_or_else(|| GradeError::Config(format!("unknown metric '{metric_str}'")))?;
        let avt_str = info_str(info, "answer_value_type")?;
        let answer_value_type = AnswerValueType::parse(avt_str)
            .ok_or_else(|| GradeError::Config(format!("unknown answer_value_type '{avt_str}'")))?;
        let idt_str = info_str(info, "input_data_type")?;
        let input_data_type = InputDataType::parse(idt_str)
            .ok_or_else(|| GradeError::Config(format!("unknown input_data_type '{idt_str}'")))?;

        let task_type = match info.get("type").and_then(Value::as_str) {
            None => TaskType::Quest,
            Some(s) => TaskType::parse(s)
                .ok_or_else(|| GradeError::Config(format!("unknown task type '{s}'")))?,
        };

        Ok(Task {
            id: info_str(info, "id")?.to_string(),
            name: info_str(info, "name")?.to_string(),
            explanation: info_str(info, "explanation")?.to_string(),
            start_date: parse_date(info_str(info, "start_date")?, "start_date")?,
            end_date: parse_date(info_str(info, "end_date")?, "end_date")?,
            answer_value_type,
            metric,
            input_data_type,
            multi_input_data: info
                .get("multi_input_data")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            task_type,
            goal: info.get("goal").and_then(Value::as_f64).unwrap_or(0.0),
            timelimit_per_data: info
                .get("timelimit_per_data")
                .and_then(Value::as_f64)
                .unwrap_or(1.0),
            suspend: info.get("suspend").and_then(Value::as_bool).unwrap_or(false),
        })
    }

    fn end_datetime(&self) -> NaiveDateTime {
        self.end_date.and_time(NaiveTime::MIN)
    }

    /// Contest currently running: test results stay concealed
    pub fn in_contest_window(&self, now: NaiveDateTime) -> bool {
        self.task_type == TaskType::Contest && now < self.end_datetime()
    }

    /// Contest closed: test results become visible and comparable
    pub fn after_contest(&self, now: NaiveDateTime) -> bool {
        self.task_type == TaskType::Contest && now >= self.end_datetime()
    }

    /// Goal check for a single metric value, direction per metric
    /// (Accuracy: at least the goal; MAE and RegistrationRate: at most)
    pub fn value_achieves_goal(&self, value: f64) -> bool {
        if self.metric.larger_is_better() {
            value >= self.goal
        } else {
            value <= self.goal
        }
    }

    /// Administrative update of the mutable fields (dates, goal, time
    /// limit, suspend). A timestamped backup of the previous file is
    /// taken first; if that backup cannot be written the update fails
    /// with the configuration untouched.
    pub fn save(&self, tasks_dir: &Path, now: NaiveDateTime) -> GradeResult<()> {
        let config_path = layout::task_config_path(tasks_dir, &self.id);
        if !config_path.exists() {
            return Err(GradeError::Config(format!(
                "task {} has no configuration to update",
                self.id
            )));
        }

        let backup_dir = layout::backup_dir(tasks_dir, &self.id);
        fs::create_dir_all(&backup_dir)?;
        let backup_name = format!(
            "{}_{}",
            now.format("%Y%m%d_%H%M%S"),
            layout::TASK_CONFIG_FILE
        );
        fs::copy(&config_path, backup_dir.join(backup_name))?;

        // Rewrite only the mutable subset, preserving everything else
        // in the document.
        let raw = fs::read_to_string(&config_path)?;
        let mut doc: Value = serde_json::from_str(&raw)?;
        let info = doc
            .get_mut("info")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| GradeError::Config(format!("{}: missing 'info' object", self.id)))?;
        info.insert(
            "start_date".into(),
            Value::from(self.start_date.format("%Y-%m-%d").to_string()),
        );
        info.insert(
            "end_date".into(),
            Value::from(self.end_date.format("%Y-%m-%d").to_string()),
        );
        info.insert("goal".into(), Value::from(self.goal));
        info.insert("timelimit_per_data".into(), Value::from(self.timelimit_per_data));
        info.insert("suspend".into(), Value::from(self.suspend));

        fs::write(&config_path, serde_json::to_string_pretty(&doc)?)?;
        Ok(())
    }
}

/// Explicitly constructed, reloadable map of task id to configuration.
///
/// The dispatcher rebuilds this each scan cycle; the presentation tier
/// holds its own instance and calls [`TaskRegistry::reload`] after an
/// administrative update.
#[derive(Debug)]
pub struct TaskRegistry {
    tasks_dir: PathBuf,
    tasks: HashMap<String, Task>,
}

impl TaskRegistry {
    /// Scan the tasks root and load every task directory. Unreadable
    /// or malformed tasks are logged and skipped. Only a completely
    /// unreadable root is an error.
    pub fn load(tasks_dir: &Path) -> GradeResult<Self> {
        let mut registry = TaskRegistry {
            tasks_dir: tasks_dir.to_path_buf(),
            tasks: HashMap::new(),
        };
        registry.reload()?;
        Ok(registry)
    }

    /// Re-derive the whole map from the tasks root.
    pub fn reload(&mut self) -> GradeResult<()> {
        let mut tasks = HashMap::new();
        for entry in fs::read_dir(&self.tasks_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let task_id = entry.file_name().to_string_lossy().into_owned();
            match Task::load(&self.tasks_dir, &task_id) {
                Ok(task) => {
                    tracing::debug!("found task: ({}) {}", task_id, task.name);
                    tasks.insert(task_id, task);
                }
                Err(e) => {
                    tracing::warn!("skipping task directory {}: {}", task_id, e);
                }
            }
        }
        self.tasks = tasks;
        Ok(())
    }

    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Task)> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks_dir(&self) -> &Path {
        &self.tasks_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_task(dir: &Path, id: &str, metric: &str) {
        let task_dir = dir.join(id);
        fs::create_dir_all(&task_dir).unwrap();
        let doc = serde_json::json!({
            "info": {
                "id": id,
                "name": format!("Task {id}"),
                "explanation": "test task",
                "start_date": "2026-01-01",
                "end_date": "2026-02-01",
                "answer_value_type": "integer",
                "metric": metric,
                "input_data_type": "image-3ch",
                "multi_input_data": false,
                "type": "contest",
                "goal": 0.9,
                "timelimit_per_data": 2.0
            }
        });
        fs::write(
            task_dir.join("task.json"),
            serde_json::to_string_pretty(&doc).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn load_reads_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        write_task(dir.path(), "task-a", "Accuracy");

        let task = Task::load(dir.path(), "task-a").unwrap();
        assert_eq!(task.id, "task-a");
        assert_eq!(task.metric, Metric::Accuracy);
        assert_eq!(task.task_type, TaskType::Contest);
        assert_eq!(task.goal, 0.9);
        assert_eq!(task.timelimit_per_data, 2.0);
        assert!(!task.suspend);
    }

    #[test]
    fn unknown_metric_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        write_task(dir.path(), "task-b", "F1");

        match Task::load(dir.path(), "task-b") {
            Err(GradeError::Config(msg)) => assert!(msg.contains("F1")),
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn registry_skips_malformed_tasks() {
        let dir = tempfile::tempdir().unwrap();
        write_task(dir.path(), "good", "MAE");
        let bad = dir.path().join("bad");
        fs::create_dir_all(&bad).unwrap();
        fs::write(bad.join("task.json"), "{not json").unwrap();

        let registry = TaskRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("good").is_some());
        assert!(registry.get("bad").is_none());
    }

    #[test]
    fn save_takes_backup_and_rewrites_mutable_fields() {
        let dir = tempfile::tempdir().unwrap();
        write_task(dir.path(), "task-c", "MAE");
        let mut task = Task::load(dir.path(), "task-c").unwrap();
        task.goal = 0.25;
        task.suspend = true;

        let now = NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_time(NaiveTime::MIN);
        task.save(dir.path(), now).unwrap();

        let backup = dir.path().join("task-c").join("backup");
        let backups: Vec<_> = fs::read_dir(&backup).unwrap().collect();
        assert_eq!(backups.len(), 1);

        let reloaded = Task::load(dir.path(), "task-c").unwrap();
        assert_eq!(reloaded.goal, 0.25);
        assert!(reloaded.suspend);
        // Immutable fields survive the rewrite untouched.
        assert_eq!(reloaded.name, "Task task-c");
    }

    #[test]
    fn save_fails_closed_when_backup_cannot_be_taken() {
        let dir = tempfile::tempdir().unwrap();
        write_task(dir.path(), "task-d", "MAE");
        // A plain file where the backup directory should go makes the
        // backup step fail before any write.
        fs::write(dir.path().join("task-d").join("backup"), "x").unwrap();

        let mut task = Task::load(dir.path(), "task-d").unwrap();
        task.goal = 0.1;
        let now = NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_time(NaiveTime::MIN);
        assert!(task.save(dir.path(), now).is_err());

        let untouched = Task::load(dir.path(), "task-d").unwrap();
        assert_eq!(untouched.goal, 0.9);
    }

    #[test]
    fn contest_window_checks() {
        let dir = tempfile::tempdir().unwrap();
        write_task(dir.path(), "task-e", "Accuracy");
        let task = Task::load(dir.path(), "task-e").unwrap();

        let during = NaiveDate::from_ymd_opt(2026, 1, 15)
            .unwrap()
            .and_time(NaiveTime::MIN);
        let after = NaiveDate::from_ymd_opt(2026, 2, 1)
            .unwrap()
            .and_time(NaiveTime::MIN);
        assert!(task.in_contest_window(during));
        assert!(!task.in_contest_window(after));
        assert!(task.after_contest(after));
    }
}
