//! Configuration for the Aiakos dispatcher

use std::env;
use std::path::PathBuf;

/// Aiakos configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory holding one subdirectory per task
    pub tasks_dir: PathBuf,

    /// Pause between upload-area scans (milliseconds)
    pub scan_interval_ms: u64,

    /// Concurrent submission pipelines
    pub pipeline_workers: usize,

    /// Interpreter command used to host a scoring routine
    pub worker_program: String,

    /// Extra arguments placed before the claimed module path
    pub worker_args: Vec<String>,

    /// File extension a pending submission must carry
    pub submission_ext: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            tasks_dir: PathBuf::from(
                env::var("TASKS_DIR").unwrap_or_else(|_| "./tasks".to_string()),
            ),
            scan_interval_ms: env::var("SCAN_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            pipeline_workers: env::var("PIPELINE_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
            worker_program: env::var("WORKER_PROGRAM").unwrap_or_else(|_| "python3".to_string()),
            worker_args: env::var("WORKER_ARGS")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            submission_ext: env::var("SUBMISSION_EXT").unwrap_or_else(|_| "py".to_string()),
        }
    }
}
