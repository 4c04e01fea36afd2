//! Checkpointed batch-job orchestration for per-cell variant calling.
//!
//! The pipeline takes one 10x BAM through eight stages. The first seven
//! narrow it down (mitochondrial reads, QC-passed cells, UMI-deduplicated)
//! on a single root item; the eighth discovers the cell barcodes and fans
//! out one split job and one variant-calling job per cell on a batch
//! scheduler, in chunks with one working directory each.
//!
//! # Resumability
//!
//! After every stage the whole [`WorkItemRegistry`] is written to
//! `checkpoint_<N>.json` in the output directory. On the next run a stage
//! whose checkpoint exists is skipped and its snapshot reloaded; a stage
//! without one reruns from the start.
//!
//! # Job completion
//!
//! Queued jobs are observed only through their stdout reports:
//!
//! | Report contains | Meaning |
//! |-----------------|---------|
//! | `Terminated at` | job finished |
//! | `Terminated at` + `Successfully completed.` | job succeeded |
//!
//! A failed job leaves its item's success flag unset and the item is
//! skipped by every later step. Nothing is retried.
//!
//! # Example
//!
//! ```no_run
//! use scvarcall_config::ScvarcallConfig;
//! use scvarcall_pipeline::{ProcessRunner, RunContext, StageController};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ScvarcallConfig::new();
//!     let ctx = RunContext::new("possorted.bam", "out", "qc_barcodes.tsv", &config)?;
//!     let runner = ProcessRunner::new(config.scheduler().submit_command);
//!
//!     let mut controller = StageController::new(&ctx, &runner);
//!     controller.run().await?;
//!     Ok(())
//! }
//! ```

pub mod barcodes;
pub mod checkpoint;
pub mod chunk;
pub mod context;
pub mod controller;
pub mod error;
pub mod item;
pub mod poller;
pub mod runner;
pub mod stages;
pub mod submit;

pub use barcodes::{CELL_BARCODE_TAG, read_barcode_listing};
pub use checkpoint::CheckpointStore;
pub use chunk::{Chunk, partition, plan_chunks};
pub use context::RunContext;
pub use controller::{StageController, StageDisposition, StageState};
pub use error::{PipelineError, Result};
pub use item::{ArtifactField, JobStage, ROOT_ITEM_NAME, WorkItem, WorkItemRegistry};
pub use poller::{
    JobStatus, OutstandingJobs, PollReport, PollSettings, StageOutcome, SUCCESS_MARKER,
    TERMINAL_MARKER, await_completion,
};
pub use runner::{CommandOutput, JobRunner, JobSpec, Launch, ProcessRunner, ResourceRequest};
pub use stages::Stage;
pub use submit::{JobSubmitter, JobTemplate};
