//! Per-run settings, built once at startup and passed by reference.

use std::path::{Path, PathBuf};
use std::time::Duration;

use scvarcall_config::{ScvarcallConfig, ToolsConfig};

use crate::error::Result;
use crate::poller::PollSettings;

/// Name of the mitochondrial subset BAM in the output directory.
pub const MT_SUBSET_BAM: &str = "MT_subset.bam";
/// Name of the QC-filtered subset BAM.
pub const QC_SUBSET_BAM: &str = "MT_subset_QC_filtered.bam";
/// Name of the UMI-deduplicated BAM.
pub const UMI_DEDUPED_BAM: &str = "MT_subset_umi_deduped.bam";
/// Name of the gzipped barcode listing.
pub const BARCODE_LISTING: &str = "unique_barcodes.tsv.gz";

/// Everything a run needs besides the registry and the job runner.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    /// Input BAM.
    pub input: PathBuf,
    /// Output directory; holds the checkpoints and chunk directories.
    pub output_dir: PathBuf,
    /// List of QC-passed barcodes handed to `subset-bam`.
    pub qc_barcodes: PathBuf,
    pub tools: ToolsConfig,
    /// Threads requested by the root-item jobs.
    pub threads: u32,
    pub chunk_size: usize,
    pub barcode_length: usize,
    pub call_script: PathBuf,
    pub merge_script: PathBuf,
    pub poll: PollSettings,
}

impl RunContext {
    /// Build a context from CLI paths and the loaded configuration.
    ///
    /// The configuration is validated first; a zero chunk size or poll
    /// interval is rejected here rather than deep inside a stage.
    pub fn new(
        input: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        qc_barcodes: impl Into<PathBuf>,
        config: &ScvarcallConfig,
    ) -> Result<Self> {
        config.validate()?;
        let pipeline = config.pipeline();
        Ok(Self {
            input: input.into(),
            output_dir: output_dir.into(),
            qc_barcodes: qc_barcodes.into(),
            tools: config.tools(),
            threads: config.scheduler().threads,
            chunk_size: pipeline.chunk_size,
            barcode_length: pipeline.barcode_length,
            call_script: pipeline.call_script,
            merge_script: pipeline.merge_script,
            poll: PollSettings {
                interval: Duration::from_secs(pipeline.poll_interval_secs),
                deadline: pipeline.poll_timeout_secs.map(Duration::from_secs),
            },
        })
    }

    /// A file directly inside the output directory.
    pub fn output_path(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }
}

/// Render a path as a single command-line argument.
pub fn arg(path: &Path) -> String {
    path.display().to_string()
}
