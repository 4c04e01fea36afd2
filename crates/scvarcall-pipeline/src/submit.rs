//! Job submission.
//!
//! The submitter sits between the stage bodies and the [`JobRunner`]. It
//! decides which exit statuses are fatal: a scheduler submission that exits
//! non-zero aborts the run, while a foreground check (quickcheck, index)
//! that fails or cannot be started only yields `false`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::chunk::Chunk;
use crate::error::{PipelineError, Result};
use crate::item::{ArtifactField, JobStage, WorkItem};
use crate::runner::{CommandOutput, JobRunner, JobSpec, ResourceRequest};

/// Workload half of a per-item job: everything except the output redirects,
/// which the submitter derives from the chunk and item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTemplate {
    pub resources: ResourceRequest,
    pub program: String,
    pub args: Vec<String>,
}

impl JobTemplate {
    pub fn new(resources: ResourceRequest, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            resources,
            program: program.into(),
            args,
        }
    }
}

/// Launches jobs through a [`JobRunner`].
pub struct JobSubmitter<'a> {
    runner: &'a dyn JobRunner,
}

impl<'a> JobSubmitter<'a> {
    pub fn new(runner: &'a dyn JobRunner) -> Self {
        Self { runner }
    }

    /// Launch a scheduler job. A non-zero exit from the submission is fatal.
    ///
    /// For interactive jobs the scheduler only returns after the workload
    /// has finished, so the exit status covers the workload too.
    pub async fn submit(&self, job: &JobSpec) -> Result<CommandOutput> {
        let output = self.runner.run(job).await?;
        if !output.success {
            return Err(PipelineError::SubmissionFailed {
                job: job.label.clone(),
                command: job.command_line(),
                exit_code: output.exit_code,
                output: output.combined_output(),
            });
        }
        debug!(job = %job.label, "Submission accepted");
        Ok(output)
    }

    /// Run a foreground helper and report whether it exited cleanly.
    ///
    /// A helper that cannot be started counts as a failed check.
    pub async fn check(&self, job: &JobSpec) -> Result<bool> {
        let output = match self.runner.run(job).await {
            Ok(output) => output,
            Err(PipelineError::Spawn { program, source }) => {
                warn!(job = %job.label, program = %program, error = %source, "Check could not be started");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        if !output.success {
            warn!(
                job = %job.label,
                exit_code = output.exit_code,
                output = %output.combined_output().trim(),
                "Check failed"
            );
        }
        Ok(output.success)
    }

    /// Queue `template` for one item in one chunk.
    ///
    /// Records the job's stdout/stderr redirect paths on the item and
    /// returns the stdout path, which is where the scheduler will write the
    /// completion markers. Reports left at those paths by an earlier attempt
    /// are removed first, since the scheduler appends to an existing file.
    pub async fn submit_for_item(
        &self,
        item: &mut WorkItem,
        stage: JobStage,
        chunk: &Chunk,
        template: JobTemplate,
    ) -> Result<PathBuf> {
        let stdout = chunk.job_stdout(stage, item.name());
        let stderr = chunk.job_stderr(stage, item.name());
        let (out_field, err_field) = match stage {
            JobStage::Split => (ArtifactField::SplitJobOut, ArtifactField::SplitJobErr),
            JobStage::VariantCall => (ArtifactField::CallJobOut, ArtifactField::CallJobErr),
        };
        item.assign(out_field, stdout.clone())?;
        item.assign(err_field, stderr.clone())?;
        remove_stale_report(&stdout).await?;
        remove_stale_report(&stderr).await?;

        let job = JobSpec::queued(
            format!("{} {}", stage, item.name()),
            template.resources,
            stdout.clone(),
            stderr,
            template.program,
            template.args,
        );
        self.submit(&job).await?;
        Ok(stdout)
    }
}

async fn remove_stale_report(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed report from an earlier attempt");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(PipelineError::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}
