//! Aiakos - Submission Dispatcher for Kritai
//!
//! Scans each task's upload area, claims pending submissions, and runs
//! them through the grading pipeline with bounded concurrency.

mod config;
mod pipeline;
mod scanner;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use tokio::sync::Semaphore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rhadamanthus::{ChildProcessBinding, RoutineRegistry};
use themis::TaskRegistry;

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aiakos=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Aiakos dispatcher");

    let config = Config::from_env();
    tracing::info!("Tasks root: {}", config.tasks_dir.display());

    let mut tasks = TaskRegistry::load(&config.tasks_dir)?;
    tracing::info!("Loaded {} task(s)", tasks.len());

    let registry = Arc::new(RoutineRegistry::new(Arc::new(ChildProcessBinding::new(
        config.worker_program.clone(),
        config.worker_args.clone(),
    ))));

    // Create shutdown signal
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    // Setup signal handlers
    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        tracing::info!("Shutdown signal received, finishing current submissions...");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    let workers = Arc::new(Semaphore::new(config.pipeline_workers));

    tracing::info!("Aiakos ready, starting scan loop");

    while !shutdown.load(Ordering::SeqCst) {
        if let Err(e) = tasks.reload() {
            tracing::error!("task registry reload failed: {e}");
        }

        for (task_id, task) in tasks.iter() {
            if task.suspend {
                tracing::debug!("task {task_id} is suspended, skipping");
                continue;
            }

            for pending in
                scanner::scan_uploads(&config.tasks_dir, task_id, &config.submission_ext)
            {
                let claimed_at = Local::now();
                let claimed =
                    match scanner::claim(&config.tasks_dir, task_id, &pending, claimed_at) {
                        Ok(claimed) => claimed,
                        Err(e) => {
                            tracing::error!(
                                "could not claim {} from {}: {e}",
                                pending.original_name,
                                pending.user
                            );
                            continue;
                        }
                    };

                // Raise the marker before handing off so the next scan
                // cannot claim a second file for the same user.
                pipeline::begin_submission(&config.tasks_dir, task_id, &claimed.user, claimed_at);

                let permit = workers.clone().acquire_owned().await?;
                let task = task.clone();
                let registry = registry.clone();
                let tasks_dir = config.tasks_dir.clone();
                tokio::spawn(async move {
                    pipeline::process_submission(&tasks_dir, &task, &registry, &claimed, claimed_at)
                        .await;
                    drop(permit);
                });
            }
        }

        tokio::time::sleep(Duration::from_millis(config.scan_interval_ms)).await;
    }

    // Let in-flight pipelines drain before exiting.
    let _ = workers.acquire_many(config.pipeline_workers as u32).await?;

    tracing::info!("Aiakos shutdown complete");
    Ok(())
}
