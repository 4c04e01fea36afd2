//! Stage 8: discover barcodes and run split → index → call → merge for each
//! chunk, one chunk at a time.

use std::io::ErrorKind;
use std::path::Path;

use tokio::fs;

use tracing::{debug, info, warn};

use super::{Stage, index_bam, required};
use crate::barcodes::read_barcode_listing;
use crate::chunk::{Chunk, plan_chunks};
use crate::context::{RunContext, arg};
use crate::error::{PipelineError, Result};
use crate::item::{ArtifactField, JobStage, WorkItem, WorkItemRegistry};
use crate::poller::{OutstandingJobs, StageOutcome, await_completion};
use crate::runner::{JobSpec, ResourceRequest};
use crate::submit::{JobSubmitter, JobTemplate};

const SPLIT_RESOURCES: ResourceRequest = ResourceRequest::memory(5_000).with_slots(12);
const CALL_RESOURCES: ResourceRequest = ResourceRequest::memory(5_000).with_slots(1);
const MERGE_RESOURCES: ResourceRequest = ResourceRequest::memory(16_000);

pub(super) async fn run(
    ctx: &RunContext,
    submitter: &JobSubmitter<'_>,
    registry: &mut WorkItemRegistry,
) -> Result<()> {
    let root = registry.root()?;
    let listing = required(&root.source.barcode_listing, "barcode listing", Stage::PerCell)?;
    let deduped = required(&root.source.umi_deduped.path, "deduplicated BAM", Stage::PerCell)?;

    let barcodes = read_barcode_listing(&listing, ctx.barcode_length)?;
    info!(count = barcodes.len(), listing = %listing.display(), "Barcodes discovered");
    registry.add_barcodes(barcodes);

    let chunks = plan_chunks(registry, ctx.chunk_size, &ctx.output_dir);
    info!(chunks = chunks.len(), chunk_size = ctx.chunk_size, "Splitting and calling variants by chunk");

    for chunk in &chunks {
        let items = &mut registry.barcodes_mut()[chunk.range.clone()];
        process_chunk(ctx, submitter, &deduped, chunk, items).await?;
    }
    Ok(())
}

/// Run the per-cell sub-sequence for one chunk.
///
/// `items` are the chunk's slice of the registry. Items whose split or call
/// fails are skipped by every later step; the merge still runs once for the
/// whole chunk.
pub async fn process_chunk(
    ctx: &RunContext,
    submitter: &JobSubmitter<'_>,
    deduped: &Path,
    chunk: &Chunk,
    items: &mut [WorkItem],
) -> Result<()> {
    chunk.prepare().await?;
    info!(chunk = chunk.index, items = items.len(), dir = %chunk.dir.display(), "Starting chunk");

    // Split
    let mut outstanding = OutstandingJobs::new();
    for item in items.iter_mut() {
        let name = item.name().to_string();
        let barcode_file = chunk.barcode_file(&name);
        let bam = chunk.split_bam(&name);

        fs::write(&barcode_file, format!("{name}\n"))
            .await
            .map_err(|source| PipelineError::WriteArtifact {
                path: barcode_file.clone(),
                source,
            })?;
        item.assign(ArtifactField::SplitBarcodeFile, barcode_file.clone())?;
        item.assign(ArtifactField::SplitBam, bam.clone())?;

        let template = JobTemplate::new(
            SPLIT_RESOURCES,
            arg(&ctx.tools.subset_bam),
            vec![
                "--cores".into(),
                "12".into(),
                "--bam".into(),
                arg(deduped),
                "--cell-barcodes".into(),
                arg(&barcode_file),
                "--out-bam".into(),
                arg(&bam),
            ],
        );
        let report = submitter
            .submit_for_item(item, JobStage::Split, chunk, template)
            .await?;
        outstanding.insert(name, report);
    }
    await_completion(items, outstanding, &StageOutcome::split(), &ctx.poll).await?;

    // Index
    for item in items.iter_mut().filter(|item| item.split.succeeded) {
        let Some(bam) = item.split.bam.clone() else {
            continue;
        };
        let bam_index = chunk.split_bam_index(item.name());
        if index_bam(ctx, submitter, &bam).await? {
            item.assign(ArtifactField::SplitBamIndex, bam_index)?;
            item.split.indexed = true;
        } else {
            warn!(chunk = chunk.index, barcode = item.name(), "Split BAM could not be indexed");
        }
    }

    // Variant calling
    let mut outstanding = OutstandingJobs::new();
    for item in items.iter_mut().filter(|item| item.split.indexed) {
        let Some(bam) = item.split.bam.clone() else {
            continue;
        };
        let name = item.name().to_string();
        let trimmed = item.trimmed_name().to_string();

        let template = JobTemplate::new(
            CALL_RESOURCES,
            arg(&ctx.tools.rscript),
            vec![arg(&ctx.call_script), arg(&bam), chunk.dir_arg()],
        );
        let report = submitter
            .submit_for_item(item, JobStage::VariantCall, chunk, template)
            .await?;

        item.assign(ArtifactField::CallOutputDir, chunk.dir.clone())?;
        item.assign(ArtifactField::CallCalls, chunk.cell_calls(&trimmed))?;
        item.assign(ArtifactField::CallCoverage, chunk.cell_coverage(&trimmed))?;
        outstanding.insert(name, report);
    }
    await_completion(items, outstanding, &StageOutcome::variant_call(), &ctx.poll).await?;

    // Merge
    let merge = JobSpec::interactive(
        format!("merge chunk {}", chunk.index),
        MERGE_RESOURCES,
        arg(&ctx.tools.rscript),
        vec![
            arg(&ctx.merge_script),
            chunk.dir_arg(),
            chunk.index.to_string(),
        ],
    );
    submitter.submit(&merge).await?;

    let merged = reconcile(chunk, items).await?;
    info!(chunk = chunk.index, merged, unmerged = items.len() - merged, "Chunk finished");
    Ok(())
}

/// Point every called item at the chunk's merged outputs and drop per-cell
/// results that have been folded in. Returns the number of merged items.
async fn reconcile(chunk: &Chunk, items: &mut [WorkItem]) -> Result<usize> {
    let merged_calls = chunk.merged_calls();
    let merged_coverage = chunk.merged_coverage();
    let calls_present = is_file(&merged_calls).await;
    let coverage_present = is_file(&merged_coverage).await;
    if !calls_present || !coverage_present {
        warn!(
            chunk = chunk.index,
            calls = calls_present,
            coverage = coverage_present,
            "Merged outputs missing, keeping per-cell results"
        );
    }

    let mut merged = 0;
    for item in items.iter_mut().filter(|item| item.call.succeeded) {
        item.assign(ArtifactField::MergeCalls, merged_calls.clone())?;
        item.assign(ArtifactField::MergeCoverage, merged_coverage.clone())?;
        item.merge.succeeded = true;
        merged += 1;

        if calls_present {
            remove_if_exists(item.artifact(ArtifactField::CallCalls)).await;
        }
        if coverage_present {
            remove_if_exists(item.artifact(ArtifactField::CallCoverage)).await;
        }
    }
    Ok(merged)
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.is_ok_and(|meta| meta.is_file())
}

async fn remove_if_exists(path: Option<&Path>) {
    let Some(path) = path else { return };
    match fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed per-cell result"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove per-cell result"),
    }
}
