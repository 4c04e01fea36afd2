//! Chunk partitioning and per-chunk artifact naming.
//!
//! Chunks are recomputed from the registry on every run and never
//! persisted. The chunk index is part of every merged output filename, so
//! partitioning must be a pure function of the barcode order and the chunk
//! size.

use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::item::{JobStage, WorkItemRegistry};

/// Split `len` items into contiguous, order-preserving ranges of at most
/// `chunk_size` items. Only the last range may be shorter. A chunk size of
/// zero is treated as one.
pub fn partition(len: usize, chunk_size: usize) -> Vec<Range<usize>> {
    let chunk_size = chunk_size.max(1);
    (0..len)
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(len))
        .collect()
}

/// A slice of the per-barcode items bound to one working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in chunk order; embedded in merged output names.
    pub index: usize,
    /// Working directory for every artifact of this chunk.
    pub dir: PathBuf,
    /// Range into [`WorkItemRegistry::barcodes`].
    pub range: Range<usize>,
}

impl Chunk {
    /// Number of items in the chunk.
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Create the working directory. Existing directories from an
    /// interrupted attempt are reused.
    pub async fn prepare(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| PipelineError::CreateDir {
                path: self.dir.clone(),
                source,
            })
    }

    /// The working directory as a script argument, with a trailing separator
    /// so the R scripts can append file names directly.
    pub fn dir_arg(&self) -> String {
        format!("{}{}", self.dir.display(), std::path::MAIN_SEPARATOR)
    }

    /// Scheduler stdout redirect for an item's job.
    pub fn job_stdout(&self, stage: JobStage, name: &str) -> PathBuf {
        self.dir.join(format!("{}_{}.o", stage.tag(), name))
    }

    /// Scheduler stderr redirect for an item's job.
    pub fn job_stderr(&self, stage: JobStage, name: &str) -> PathBuf {
        self.dir.join(format!("{}_{}.e", stage.tag(), name))
    }

    /// One-line barcode list handed to `subset-bam`.
    pub fn barcode_file(&self, name: &str) -> PathBuf {
        self.dir.join(format!("barcode_{name}.txt"))
    }

    /// Single-cell BAM produced by the split job.
    pub fn split_bam(&self, name: &str) -> PathBuf {
        self.dir.join(format!("cell_{name}.bam"))
    }

    /// Index written next to the split BAM.
    pub fn split_bam_index(&self, name: &str) -> PathBuf {
        self.dir.join(format!("cell_{name}.bam.bai"))
    }

    /// Per-cell calls RDS written by the calling script.
    pub fn cell_calls(&self, trimmed_name: &str) -> PathBuf {
        self.dir.join(format!("cell_{trimmed_name}.calls.rds"))
    }

    /// Per-cell coverage RDS written by the calling script.
    pub fn cell_coverage(&self, trimmed_name: &str) -> PathBuf {
        self.dir.join(format!("cell_{trimmed_name}.coverage.rds"))
    }

    /// Chunk-wide merged calls.
    pub fn merged_calls(&self) -> PathBuf {
        self.dir.join(format!("chunk_{}.calls.rds", self.index))
    }

    /// Chunk-wide merged coverage.
    pub fn merged_coverage(&self) -> PathBuf {
        self.dir.join(format!("chunk_{}.coverage.rds", self.index))
    }
}

/// Partition the registry's barcode items (root excluded) into chunks under
/// `output_dir/chunk_<i>/`.
pub fn plan_chunks(registry: &WorkItemRegistry, chunk_size: usize, output_dir: &Path) -> Vec<Chunk> {
    partition(registry.barcodes().len(), chunk_size)
        .into_iter()
        .enumerate()
        .map(|(index, range)| Chunk {
            index,
            dir: output_dir.join(format!("chunk_{index}")),
            range,
        })
        .collect()
}
