//! Upload-area scanning and submission claiming.
//!
//! Each task directory has an `upload/<user>/` area the presentation
//! tier drops files into. One file per user is picked up per scan
//! cycle; claiming re-encodes the file as UTF-8 (lossily if need be)
//! into the execution area under a timestamped name and removes the
//! original, so a claimed submission can never be scanned twice.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use kritai_common::{GradeError, GradeResult};
use themis::layout;

/// A submission still sitting in the upload area
#[derive(Debug, Clone)]
pub struct PendingSubmission {
    pub user: String,
    pub original_name: String,
    pub path: PathBuf,
}

/// A submission moved into the execution area
#[derive(Debug, Clone)]
pub struct ClaimedSubmission {
    pub user: String,
    pub stored_name: String,
    pub module_path: PathBuf,
    /// Free-form note from the optional sidecar file, recorded in the
    /// ledger memo column
    pub memo: String,
}

/// List at most one pending submission per user. Users whose
/// in-progress marker is raised are skipped until it clears.
pub fn scan_uploads(tasks_dir: &Path, task_id: &str, ext: &str) -> Vec<PendingSubmission> {
    let upload_dir = layout::upload_dir(tasks_dir, task_id);
    let entries = match fs::read_dir(&upload_dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut pending = Vec::new();
    for entry in entries.flatten() {
        let user_dir = entry.path();
        if !user_dir.is_dir() {
            continue;
        }
        let user = entry.file_name().to_string_lossy().into_owned();
        if layout::marker_path(tasks_dir, task_id, &user).exists() {
            tracing::debug!("user {user} still in progress, skipping");
            continue;
        }

        let mut files: Vec<PathBuf> = match fs::read_dir(&user_dir) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| {
                    p.is_file() && p.extension().map(|e| e == ext).unwrap_or(false)
                })
                .collect(),
            Err(e) => {
                tracing::warn!("cannot read upload area of {user}: {e}");
                continue;
            }
        };
        files.sort();

        if let Some(path) = files.into_iter().next() {
            let original_name = match path.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };
            pending.push(PendingSubmission {
                user,
                original_name,
                path,
            });
        }
    }
    pending
}

/// Claim a pending submission: re-encode it into the execution area
/// under `<user>_<task>_<timestamp>_<original>` and remove the upload.
/// An optional `<original>.txt` memo sidecar moves along with it as
/// `<stored>.txt`.
pub fn claim(
    tasks_dir: &Path,
    task_id: &str,
    pending: &PendingSubmission,
    claimed_at: DateTime<Local>,
) -> GradeResult<ClaimedSubmission> {
    let bytes = fs::read(&pending.path)
        .map_err(|e| GradeError::Load(format!("cannot read {}: {e}", pending.path.display())))?;
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    };

    let stored_name = format!(
        "{}_{}_{}_{}",
        pending.user,
        task_id,
        claimed_at.format("%Y%m%d_%H%M%S"),
        pending.original_name
    );
    let module_dir = layout::module_dir(tasks_dir, task_id);
    fs::create_dir_all(&module_dir)?;
    let module_path = module_dir.join(&stored_name);
    fs::write(&module_path, text)?;
    fs::remove_file(&pending.path)?;

    // The sidecar travels with the submission: it lands next to the
    // stored module under the same timestamped name.
    let sidecar = pending.path.with_file_name(format!("{}.txt", pending.original_name));
    let memo = match fs::read_to_string(&sidecar) {
        Ok(memo) => {
            let kept = module_dir.join(format!("{stored_name}.txt"));
            if let Err(e) = fs::rename(&sidecar, &kept) {
                tracing::warn!("could not move memo sidecar {}: {e}", sidecar.display());
            }
            memo.trim().to_string()
        }
        Err(_) => String::new(),
    };

    tracing::info!("claimed {} as {stored_name}", pending.path.display());
    Ok(ClaimedSubmission {
        user: pending.user.clone(),
        stored_name,
        module_path,
        memo,
    })
}
