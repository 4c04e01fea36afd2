//! Completion polling.
//!
//! The scheduler exposes no job-control API to this tool; the only signal
//! that a queued job has finished is the report it appends to the job's
//! stdout redirect. The poller re-reads those files until every outstanding
//! job shows the terminal marker.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::item::{ArtifactField, JobStage, WorkItem};

/// Present in a job report once the job has stopped running.
pub const TERMINAL_MARKER: &str = "Terminated at";

/// Present in a job report when the workload exited cleanly.
pub const SUCCESS_MARKER: &str = "Successfully completed.";

/// Default pause between poll passes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Inputs
// ─────────────────────────────────────────────────────────────────────────────

/// What a successful job means for its item: which success flag to set and
/// which now-unneeded artifacts to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub stage: JobStage,
    pub cleanup: Vec<ArtifactField>,
}

impl StageOutcome {
    /// Split jobs: drop the job reports and the one-line barcode file.
    pub fn split() -> Self {
        Self {
            stage: JobStage::Split,
            cleanup: vec![
                ArtifactField::SplitJobOut,
                ArtifactField::SplitJobErr,
                ArtifactField::SplitBarcodeFile,
            ],
        }
    }

    /// Variant-call jobs: drop the job reports and the single-cell BAM.
    pub fn variant_call() -> Self {
        Self {
            stage: JobStage::VariantCall,
            cleanup: vec![
                ArtifactField::CallJobOut,
                ArtifactField::CallJobErr,
                ArtifactField::SplitBam,
                ArtifactField::SplitBamIndex,
            ],
        }
    }

    async fn apply(&self, item: &mut WorkItem) -> Result<()> {
        item.mark_succeeded(self.stage);
        for &field in &self.cleanup {
            let Some(path) = item.artifact(field) else {
                continue;
            };
            tokio::fs::remove_file(path)
                .await
                .map_err(|source| PipelineError::Cleanup {
                    path: path.to_path_buf(),
                    source,
                })?;
            debug!(item = item.name(), artifact = field.name(), "Removed");
        }
        Ok(())
    }
}

/// Item name → job report path, for the jobs of one polling cycle.
pub type OutstandingJobs = BTreeMap<String, PathBuf>;

/// Cadence and optional deadline for one polling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// `None` waits for as long as it takes.
    pub deadline: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            deadline: None,
        }
    }
}

/// How the jobs of one polling cycle ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub timed_out: Vec<String>,
    /// Number of passes over the outstanding set.
    pub passes: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Report inspection
// ─────────────────────────────────────────────────────────────────────────────

/// State of a job as read from its report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Report missing, unreadable or without the terminal marker.
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn from_report(content: &str) -> Self {
        if !content.contains(TERMINAL_MARKER) {
            Self::Running
        } else if content.contains(SUCCESS_MARKER) {
            Self::Succeeded
        } else {
            Self::Failed
        }
    }
}

async fn inspect(path: &Path) -> JobStatus {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => JobStatus::from_report(&content),
        Err(_) => JobStatus::Running,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Poll loop
// ─────────────────────────────────────────────────────────────────────────────

/// Wait until every outstanding job has terminated, applying `outcome` to
/// the items whose job succeeded.
///
/// Jobs that terminate without the success marker are logged and leave the
/// item's success flag unset. Failing to delete a cleanup artifact is fatal.
/// With a deadline, jobs still running when it passes are treated as
/// failed.
pub async fn await_completion(
    items: &mut [WorkItem],
    mut outstanding: OutstandingJobs,
    outcome: &StageOutcome,
    settings: &PollSettings,
) -> Result<PollReport> {
    let index: HashMap<String, usize> = items
        .iter()
        .enumerate()
        .map(|(i, item)| (item.name().to_string(), i))
        .collect();

    let started = Instant::now();
    let mut report = PollReport::default();

    info!(stage = %outcome.stage, jobs = outstanding.len(), "Waiting for jobs");

    while !outstanding.is_empty() {
        report.passes += 1;

        let mut finished = Vec::new();
        for (name, path) in &outstanding {
            match inspect(path).await {
                JobStatus::Running => {}
                JobStatus::Succeeded => {
                    if let Some(&i) = index.get(name) {
                        outcome.apply(&mut items[i]).await?;
                    }
                    report.succeeded.push(name.clone());
                    finished.push(name.clone());
                }
                JobStatus::Failed => {
                    warn!(
                        stage = %outcome.stage,
                        item = %name,
                        report = %path.display(),
                        "Job failed, see report"
                    );
                    report.failed.push(name.clone());
                    finished.push(name.clone());
                }
            }
        }
        for name in finished {
            outstanding.remove(&name);
        }

        debug!(
            stage = %outcome.stage,
            pass = report.passes,
            remaining = outstanding.len(),
            "Poll pass complete"
        );

        if outstanding.is_empty() {
            break;
        }

        if let Some(deadline) = settings.deadline
            && started.elapsed() >= deadline
        {
            for (name, path) in &outstanding {
                warn!(
                    stage = %outcome.stage,
                    item = %name,
                    report = %path.display(),
                    "Job did not terminate before the poll deadline"
                );
            }
            report.timed_out = outstanding.into_keys().collect();
            break;
        }

        tokio::time::sleep(settings.interval).await;
    }

    info!(
        stage = %outcome.stage,
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        timed_out = report.timed_out.len(),
        "Jobs finished"
    );
    Ok(report)
}
