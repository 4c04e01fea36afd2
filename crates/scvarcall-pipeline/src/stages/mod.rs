//! The eight checkpointed pipeline stages.
//!
//! Stages 1 through 7 work on the root item only. Stage 8 discovers the
//! cell barcodes and fans out over them chunk by chunk.

mod per_cell;
mod root;

use std::path::{Path, PathBuf};

use crate::context::{RunContext, arg};
use crate::error::{PipelineError, Result};
use crate::item::{ROOT_ITEM_NAME, WorkItemRegistry};
use crate::runner::JobSpec;
use crate::submit::JobSubmitter;

pub use per_cell::process_chunk;

/// A top-level stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Initialize = 1,
    MitochondrialSubset = 2,
    IndexMitochondrial = 3,
    QcSubset = 4,
    UmiDedup = 5,
    IndexDeduplicated = 6,
    ListBarcodes = 7,
    PerCell = 8,
}

impl Stage {
    /// All stages in the order they run.
    pub const ALL: [Stage; 8] = [
        Stage::Initialize,
        Stage::MitochondrialSubset,
        Stage::IndexMitochondrial,
        Stage::QcSubset,
        Stage::UmiDedup,
        Stage::IndexDeduplicated,
        Stage::ListBarcodes,
        Stage::PerCell,
    ];

    /// Checkpoint number.
    pub fn number(self) -> u32 {
        self as u32
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Initialize => "initialize output directory and root item",
            Self::MitochondrialSubset => "subset input to mitochondrial reads",
            Self::IndexMitochondrial => "index mitochondrial subset",
            Self::QcSubset => "restrict to QC-passed barcodes",
            Self::UmiDedup => "UMI deduplication",
            Self::IndexDeduplicated => "index deduplicated BAM",
            Self::ListBarcodes => "list unique cell barcodes",
            Self::PerCell => "per-cell split, variant calling and merge",
        }
    }

    /// Execute this stage's body against the registry.
    pub(crate) async fn execute(
        self,
        ctx: &RunContext,
        submitter: &JobSubmitter<'_>,
        registry: &mut WorkItemRegistry,
    ) -> Result<()> {
        match self {
            Self::Initialize => root::initialize(ctx, registry),
            Self::MitochondrialSubset => root::mitochondrial_subset(ctx, submitter, registry).await,
            Self::IndexMitochondrial => root::index_mitochondrial(ctx, submitter, registry).await,
            Self::QcSubset => root::qc_subset(ctx, submitter, registry).await,
            Self::UmiDedup => root::umi_dedup(ctx, submitter, registry).await,
            Self::IndexDeduplicated => root::index_deduplicated(ctx, submitter, registry).await,
            Self::ListBarcodes => root::list_barcodes(ctx, submitter, registry).await,
            Self::PerCell => per_cell::run(ctx, submitter, registry).await,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.number())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared helpers
// ─────────────────────────────────────────────────────────────────────────────

/// A root artifact recorded by an earlier stage.
fn required(path: &Option<PathBuf>, artifact: &'static str, stage: Stage) -> Result<PathBuf> {
    path.clone().ok_or_else(|| PipelineError::MissingArtifact {
        item: ROOT_ITEM_NAME.to_string(),
        artifact,
        stage: stage.number(),
    })
}

/// `samtools quickcheck <bam>`; `true` when the BAM is intact.
async fn quickcheck(ctx: &RunContext, submitter: &JobSubmitter<'_>, bam: &Path) -> Result<bool> {
    let job = JobSpec::local(
        format!("quickcheck {}", bam.display()),
        arg(&ctx.tools.samtools),
        vec!["quickcheck".to_string(), arg(bam)],
    );
    submitter.check(&job).await
}

/// `samtools index <bam>`; `true` when the index was written.
async fn index_bam(ctx: &RunContext, submitter: &JobSubmitter<'_>, bam: &Path) -> Result<bool> {
    let job = JobSpec::local(
        format!("index {}", bam.display()),
        arg(&ctx.tools.samtools),
        vec!["index".to_string(), arg(bam)],
    );
    submitter.check(&job).await
}
