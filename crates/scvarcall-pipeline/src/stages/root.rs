//! Root-item stages: from the input BAM to the unique barcode listing.

use std::fs;

use tracing::{info, warn};

use super::{Stage, index_bam, quickcheck, required};
use crate::context::{BARCODE_LISTING, MT_SUBSET_BAM, QC_SUBSET_BAM, RunContext, UMI_DEDUPED_BAM, arg};
use crate::error::{PipelineError, Result};
use crate::item::{WorkItem, WorkItemRegistry};
use crate::runner::{JobSpec, ResourceRequest};
use crate::submit::JobSubmitter;

/// Stage 1: create the output directory and seed the registry with the root
/// item. An existing directory is reused.
pub(super) fn initialize(ctx: &RunContext, registry: &mut WorkItemRegistry) -> Result<()> {
    fs::create_dir_all(&ctx.output_dir).map_err(|source| PipelineError::CreateDir {
        path: ctx.output_dir.clone(),
        source,
    })?;
    *registry = WorkItemRegistry::with_root(WorkItem::root(&ctx.input, &ctx.output_dir));
    info!(input = %ctx.input.display(), output = %ctx.output_dir.display(), "Root item created");
    Ok(())
}

/// Stage 2: `samtools view <input> MT` into `MT_subset.bam`.
pub(super) async fn mitochondrial_subset(
    ctx: &RunContext,
    submitter: &JobSubmitter<'_>,
    registry: &mut WorkItemRegistry,
) -> Result<()> {
    let root = registry.root_mut()?;
    let input = required(&root.source.original.path, "input BAM", Stage::MitochondrialSubset)?;

    root.source.original.quickcheck_ok = quickcheck(ctx, submitter, &input).await?;
    if !root.source.original.quickcheck_ok {
        warn!(path = %input.display(), "Input BAM failed quickcheck, continuing");
    }

    let out = ctx.output_path(MT_SUBSET_BAM);
    let threads = ctx.threads.to_string();
    let job = JobSpec::interactive(
        "MT subset",
        ResourceRequest::memory(50_000).with_slots(ctx.threads),
        arg(&ctx.tools.samtools),
        vec![
            "view".into(),
            arg(&input),
            "MT".into(),
            "-b".into(),
            "-@".into(),
            threads,
            ">".into(),
            arg(&out),
        ],
    );
    submitter.submit(&job).await?;

    root.source.mt_subset.path = Some(out.clone());
    root.source.mt_subset.quickcheck_ok = quickcheck(ctx, submitter, &out).await?;
    Ok(())
}

/// Stage 3: index the mitochondrial subset.
pub(super) async fn index_mitochondrial(
    ctx: &RunContext,
    submitter: &JobSubmitter<'_>,
    registry: &mut WorkItemRegistry,
) -> Result<()> {
    let root = registry.root_mut()?;
    let bam = required(&root.source.mt_subset.path, "MT subset BAM", Stage::IndexMitochondrial)?;
    root.source.mt_subset.indexed = index_bam(ctx, submitter, &bam).await?;
    Ok(())
}

/// Stage 4: restrict the mitochondrial subset to QC-passed barcodes.
pub(super) async fn qc_subset(
    ctx: &RunContext,
    submitter: &JobSubmitter<'_>,
    registry: &mut WorkItemRegistry,
) -> Result<()> {
    let root = registry.root_mut()?;
    let mt = required(&root.source.mt_subset.path, "MT subset BAM", Stage::QcSubset)?;
    let out = ctx.output_path(QC_SUBSET_BAM);
    root.source.qc_subset.path = Some(out.clone());

    let job = JobSpec::interactive(
        "QC subset",
        ResourceRequest::memory(5_000).with_slots(12),
        arg(&ctx.tools.subset_bam),
        vec![
            "--cores".into(),
            "12".into(),
            "--bam".into(),
            arg(&mt),
            "--cell-barcodes".into(),
            arg(&ctx.qc_barcodes),
            "--out-bam".into(),
            arg(&out),
        ],
    );
    submitter.submit(&job).await?;

    root.source.qc_subset.quickcheck_ok = quickcheck(ctx, submitter, &out).await?;
    root.source.qc_subset.indexed = index_bam(ctx, submitter, &out).await?;
    Ok(())
}

/// Stage 5: collapse reads sharing a UMI within each cell.
pub(super) async fn umi_dedup(
    ctx: &RunContext,
    submitter: &JobSubmitter<'_>,
    registry: &mut WorkItemRegistry,
) -> Result<()> {
    let root = registry.root_mut()?;
    let qc = required(&root.source.qc_subset.path, "QC subset BAM", Stage::UmiDedup)?;
    let out = ctx.output_path(UMI_DEDUPED_BAM);
    root.source.umi_deduped.path = Some(out.clone());

    let args = [
        "dedup",
        "--paired",
        "--chrom",
        "MT",
        "--extract-umi-method",
        "tag",
        "--umi-tag",
        "UB",
        "--per-cell",
        "--cell-tag",
        "CB",
        "-I",
    ]
    .into_iter()
    .map(String::from)
    .chain([arg(&qc), "-S".to_string(), arg(&out)])
    .collect();

    let job = JobSpec::interactive(
        "UMI dedup",
        ResourceRequest::memory(80_000),
        arg(&ctx.tools.umi_tools),
        args,
    );
    submitter.submit(&job).await?;

    root.source.deduplicated = true;
    root.source.umi_deduped.quickcheck_ok = quickcheck(ctx, submitter, &out).await?;
    Ok(())
}

/// Stage 6: index the deduplicated BAM.
pub(super) async fn index_deduplicated(
    ctx: &RunContext,
    submitter: &JobSubmitter<'_>,
    registry: &mut WorkItemRegistry,
) -> Result<()> {
    let root = registry.root_mut()?;
    let bam = required(&root.source.umi_deduped.path, "deduplicated BAM", Stage::IndexDeduplicated)?;
    root.source.umi_deduped.indexed = index_bam(ctx, submitter, &bam).await?;
    Ok(())
}

/// Stage 7: write every distinct `CB:Z:` tag of the deduplicated BAM to a
/// gzipped listing.
pub(super) async fn list_barcodes(
    ctx: &RunContext,
    submitter: &JobSubmitter<'_>,
    registry: &mut WorkItemRegistry,
) -> Result<()> {
    let root = registry.root_mut()?;
    let bam = required(&root.source.umi_deduped.path, "deduplicated BAM", Stage::ListBarcodes)?;
    let listing = ctx.output_path(BARCODE_LISTING);
    let threads = ctx.threads.to_string();

    // Runs as one remote shell command line.
    let job = JobSpec::interactive(
        "barcode listing",
        ResourceRequest::memory(50_000).with_slots(ctx.threads),
        arg(&ctx.tools.samtools),
        vec![
            "view".into(),
            arg(&bam),
            "|".into(),
            "grep".into(),
            "-oE".into(),
            "'CB:Z:[acgtnACGTN-]+[1-9]'".into(),
            "|".into(),
            "sort".into(),
            "-u".into(),
            "--parallel".into(),
            threads,
            "|".into(),
            "gzip".into(),
            ">".into(),
            arg(&listing),
        ],
    );
    submitter.submit(&job).await?;

    root.source.barcode_listing = Some(listing);
    Ok(())
}
