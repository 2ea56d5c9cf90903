//! Directory layout under the tasks root.
//!
//! One directory per task, with fixed child names shared between the
//! dispatcher, the ledger, and the presentation tier:
//!
//! ```text
//! <tasks>/<task-id>/task.json            task configuration
//! <tasks>/<task-id>/backup/              timestamped config backups
//! <tasks>/<task-id>/<split>/dataset.json sample manifest per split
//! <tasks>/<task-id>/upload/<user>/       pending submissions
//! <tasks>/<task-id>/user_module/         claimed submissions
//! <tasks>/<task-id>/output/user/         per-user ledgers + markers
//! <tasks>/<task-id>/output/detail/       per-submission reports
//! <tasks>/<task-id>/output/timestamp.txt freshness stamp
//! ```

use std::path::{Path, PathBuf};

pub const TASK_CONFIG_FILE: &str = "task.json";
pub const DATASET_MANIFEST_FILE: &str = "dataset.json";
pub const BACKUP_DIR: &str = "backup";
pub const UPLOAD_DIR: &str = "upload";
pub const MODULE_DIR: &str = "user_module";
pub const OUTPUT_DIR: &str = "output";
pub const USER_RESULT_DIR: &str = "user";
pub const DETAIL_DIR: &str = "detail";
pub const TIMESTAMP_FILE: &str = "timestamp.txt";

pub fn task_dir(tasks_dir: &Path, task_id: &str) -> PathBuf {
    tasks_dir.join(task_id)
}

pub fn task_config_path(tasks_dir: &Path, task_id: &str) -> PathBuf {
    task_dir(tasks_dir, task_id).join(TASK_CONFIG_FILE)
}

pub fn backup_dir(tasks_dir: &Path, task_id: &str) -> PathBuf {
    task_dir(tasks_dir, task_id).join(BACKUP_DIR)
}

pub fn split_manifest_path(tasks_dir: &Path, task_id: &str, split: &str) -> PathBuf {
    task_dir(tasks_dir, task_id)
        .join(split)
        .join(DATASET_MANIFEST_FILE)
}

pub fn upload_dir(tasks_dir: &Path, task_id: &str) -> PathBuf {
    task_dir(tasks_dir, task_id).join(UPLOAD_DIR)
}

pub fn module_dir(tasks_dir: &Path, task_id: &str) -> PathBuf {
    task_dir(tasks_dir, task_id).join(MODULE_DIR)
}

pub fn output_dir(tasks_dir: &Path, task_id: &str) -> PathBuf {
    task_dir(tasks_dir, task_id).join(OUTPUT_DIR)
}

pub fn user_result_dir(tasks_dir: &Path, task_id: &str) -> PathBuf {
    output_dir(tasks_dir, task_id).join(USER_RESULT_DIR)
}

pub fn user_ledger_path(tasks_dir: &Path, task_id: &str, user: &str) -> PathBuf {
    user_result_dir(tasks_dir, task_id).join(format!("{user}.csv"))
}

pub fn marker_path(tasks_dir: &Path, task_id: &str, user: &str) -> PathBuf {
    user_result_dir(tasks_dir, task_id).join(format!("{user}_inproc"))
}

pub fn detail_dir(tasks_dir: &Path, task_id: &str) -> PathBuf {
    output_dir(tasks_dir, task_id).join(DETAIL_DIR)
}

pub fn timestamp_path(tasks_dir: &Path, task_id: &str) -> PathBuf {
    output_dir(tasks_dir, task_id).join(TIMESTAMP_FILE)
}
