//! Scheduler module for running report jobs.
//!
//! A trigger persists a `Running` report and queues it; a single worker task
//! picks jobs off the queue and runs each one in the background. Every job
//! ends in exactly one terminal state, `Completed` or `Failed`.

mod extrapolate;
mod fanout;

pub use extrapolate::*;
pub use fanout::*;

use crate::config::{MidnightWindows, ServerConfig};
use crate::db::{DbError, LocationMetrics, Report, Store, INTERRUPTED_REASON};

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Length of a report token.
const TOKEN_LEN: usize = 32;

/// Jobs that may wait for the worker before `trigger` applies backpressure.
const QUEUE_CAPACITY: usize = 1000;

/// Report job error types.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("database error: {0}")]
    Db(#[from] DbError),
    #[error(transparent)]
    Extrapolate(#[from] ExtrapolateError),
    #[error("location {location_id}: {source}")]
    Location {
        location_id: String,
        #[source]
        source: Box<ReportError>,
    },
    #[error("location {location_id} timed out after {after:?}")]
    Timeout { location_id: String, after: Duration },
    #[error("location {location_id} task failed: {reason}")]
    Panicked { location_id: String, reason: String },
    #[error("job queue is closed")]
    QueueClosed,
}

/// Settings that shape how a report job runs.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub roster_limit: usize,
    pub location_timeout: Duration,
    pub midnight_windows: MidnightWindows,
}

impl From<&ServerConfig> for JobSettings {
    fn from(cfg: &ServerConfig) -> Self {
        Self {
            roster_limit: cfg.roster_limit,
            location_timeout: cfg.location_timeout,
            midnight_windows: cfg.midnight_windows,
        }
    }
}

struct QueuedJob {
    report_id: String,
    roster: Option<Vec<String>>,
}

/// Owns the lifecycle of report jobs.
pub struct JobController {
    store: Arc<Store>,
    settings: JobSettings,
    queue_tx: mpsc::Sender<QueuedJob>,
}

impl JobController {
    /// Create the controller and start its worker.
    ///
    /// The worker stops once the last handle to the controller is dropped.
    pub fn start(store: Arc<Store>, settings: JobSettings) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);

        let controller = Arc::new(Self {
            store,
            settings,
            queue_tx: tx,
        });

        tokio::spawn(run_worker(rx, Arc::downgrade(&controller), controller.store.clone()));

        controller
    }

    /// Create a `Running` report, queue it, and return its token.
    ///
    /// `roster` lists the locations to cover; `None` takes the first
    /// `roster_limit` known locations when the job runs.
    pub async fn trigger(&self, roster: Option<Vec<String>>) -> Result<String, ReportError> {
        let report_id = generate_token();
        self.store.create_report(&report_id, Utc::now())?;

        let job = QueuedJob {
            report_id: report_id.clone(),
            roster,
        };
        if self.queue_tx.send(job).await.is_err() {
            let err = ReportError::QueueClosed;
            if let Err(e) = self.fail(&report_id, &err.to_string()) {
                tracing::error!("Report {}: failed to record queue failure: {}", report_id, e);
            }
            return Err(err);
        }

        tracing::info!("Report {} queued", report_id);
        Ok(report_id)
    }

    /// Get the persisted state of a report.
    pub fn get_status(&self, report_id: &str) -> Result<Report, ReportError> {
        Ok(self.store.get_report(report_id)?)
    }

    /// Mark a running report as completed with its results.
    pub fn complete(&self, report_id: &str, result: &[LocationMetrics]) -> Result<(), ReportError> {
        self.store.complete_report(report_id, Utc::now(), result)?;
        Ok(())
    }

    /// Mark a running report as failed.
    pub fn fail(&self, report_id: &str, reason: &str) -> Result<(), ReportError> {
        self.store.fail_report(report_id, Utc::now(), reason)?;
        Ok(())
    }

    async fn run_job(&self, job: QueuedJob) {
        let QueuedJob { report_id, roster } = job;
        let started = std::time::Instant::now();

        let recorded = match self.compute(roster).await {
            Ok(metrics) => {
                tracing::info!(
                    "Report {} completed: {} locations in {:?}",
                    report_id,
                    metrics.len(),
                    started.elapsed()
                );
                self.complete(&report_id, &metrics)
            }
            Err(e) => {
                tracing::error!("Report {} failed: {}", report_id, e);
                self.fail(&report_id, &e.to_string())
            }
        };

        if let Err(e) = recorded {
            tracing::error!("Report {}: failed to record outcome: {}", report_id, e);
            let reason = format!("failed to record result: {}", e);
            if let Err(e) = self.fail(&report_id, &reason) {
                tracing::error!("Report {}: left running: {}", report_id, e);
            }
        }
    }

    async fn compute(&self, roster: Option<Vec<String>>) -> Result<Vec<LocationMetrics>, ReportError> {
        let locations = match roster {
            Some(ids) => ids,
            None => self.store.get_location_roster(self.settings.roster_limit)?,
        };
        tracing::debug!("Computing metrics for {} locations", locations.len());

        let store = self.store.clone();
        let midnight = self.settings.midnight_windows;

        // SQLite access blocks, so each location runs on the blocking pool and
        // the timeout applies to the handle rather than the work itself.
        fan_out(locations, self.settings.location_timeout, move |location_id| {
            let store = store.clone();
            async move {
                let id = location_id.clone();
                tokio::task::spawn_blocking(move || compute_location(&store, &id, midnight))
                    .await
                    .map_err(|e| ReportError::Panicked {
                        location_id,
                        reason: e.to_string(),
                    })?
            }
        })
        .await
    }
}

/// Load one location's data and extrapolate its metrics.
pub fn compute_location(
    store: &Store,
    location_id: &str,
    midnight: MidnightWindows,
) -> Result<LocationMetrics, ReportError> {
    let profile = store.get_location_profile(location_id)?;
    let samples = store.get_status_samples(location_id)?;
    let windows = store.get_business_hours(location_id)?;
    tracing::debug!(
        "Location {} ({}): {} samples, {} windows",
        profile.location_id,
        profile.timezone,
        samples.len(),
        windows.len()
    );

    Ok(extrapolate(
        location_id,
        &samples,
        &windows,
        &profile.timezone,
        midnight,
    )?)
}

/// Receive queued jobs and run each one on its own task.
///
/// Jobs still queued after the controller is gone are failed, not dropped.
async fn run_worker(
    mut rx: mpsc::Receiver<QueuedJob>,
    controller: Weak<JobController>,
    store: Arc<Store>,
) {
    while let Some(job) = rx.recv().await {
        match controller.upgrade() {
            Some(controller) => {
                tokio::spawn(async move {
                    controller.run_job(job).await;
                });
            }
            None => {
                if let Err(e) = store.fail_report(&job.report_id, Utc::now(), INTERRUPTED_REASON) {
                    tracing::error!("Report {}: left running: {}", job.report_id, e);
                }
            }
        }
    }
    tracing::debug!("Report worker stopped");
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}
