//! Work items and the in-memory registry.
//!
//! The registry is an ordered list: the root item (the whole input BAM)
//! always comes first, followed by one item per discovered cell barcode in
//! discovery order. That order is what the chunk partitioner slices, so it
//! must survive a checkpoint round-trip unchanged.
//!
//! Every artifact slot starts unset and is filled exactly once, when the
//! stage that produces it is reached for that item.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Identifier of the root item.
pub const ROOT_ITEM_NAME: &str = "MASTER";

// ─────────────────────────────────────────────────────────────────────────────
// Stage descriptors
// ─────────────────────────────────────────────────────────────────────────────

/// Per-item stages whose completion is observed by the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    /// Split the deduplicated BAM down to one cell.
    Split,
    /// Call variants on the split BAM.
    VariantCall,
}

impl JobStage {
    /// Filename tag used for this stage's job artifacts.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Split => "cellsplit",
            Self::VariantCall => "Rvarcall",
        }
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Split => write!(f, "split"),
            Self::VariantCall => write!(f, "variant call"),
        }
    }
}

/// A per-item artifact path slot, addressable without reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactField {
    SplitJobOut,
    SplitJobErr,
    SplitBarcodeFile,
    SplitBam,
    SplitBamIndex,
    CallJobOut,
    CallJobErr,
    CallOutputDir,
    CallCalls,
    CallCoverage,
    MergeCalls,
    MergeCoverage,
}

impl ArtifactField {
    /// Human-readable slot name, used in logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            Self::SplitJobOut => "split job stdout",
            Self::SplitJobErr => "split job stderr",
            Self::SplitBarcodeFile => "split barcode file",
            Self::SplitBam => "split BAM",
            Self::SplitBamIndex => "split BAM index",
            Self::CallJobOut => "call job stdout",
            Self::CallJobErr => "call job stderr",
            Self::CallOutputDir => "call output directory",
            Self::CallCalls => "per-cell calls",
            Self::CallCoverage => "per-cell coverage",
            Self::MergeCalls => "merged calls",
            Self::MergeCoverage => "merged coverage",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Artifact groups
// ─────────────────────────────────────────────────────────────────────────────

/// A BAM produced by one of the root stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BamArtifact {
    pub path: Option<PathBuf>,
    pub quickcheck_ok: bool,
    pub indexed: bool,
}

/// Artifacts of the root-only stages (1 through 7).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceArtifacts {
    /// The input BAM as given on the command line.
    pub original: BamArtifact,
    /// Mitochondrial-only subset.
    pub mt_subset: BamArtifact,
    /// Subset restricted to QC-passed barcodes.
    pub qc_subset: BamArtifact,
    /// UMI-deduplicated BAM; the split stage reads from this.
    pub umi_deduped: BamArtifact,
    /// Whether the deduplication job finished.
    pub deduplicated: bool,
    /// Gzipped `CB:Z:` listing produced by the discovery stage.
    pub barcode_listing: Option<PathBuf>,
}

/// Split-stage artifacts for one cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitArtifacts {
    pub job_out: Option<PathBuf>,
    pub job_err: Option<PathBuf>,
    pub barcode_file: Option<PathBuf>,
    pub bam: Option<PathBuf>,
    pub bam_index: Option<PathBuf>,
    pub succeeded: bool,
    pub indexed: bool,
}

/// Variant-calling artifacts for one cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallArtifacts {
    pub job_out: Option<PathBuf>,
    pub job_err: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub calls: Option<PathBuf>,
    pub coverage: Option<PathBuf>,
    pub succeeded: bool,
}

/// Chunk-level merge outputs this cell was folded into.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeArtifacts {
    pub calls: Option<PathBuf>,
    pub coverage: Option<PathBuf>,
    pub succeeded: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// WorkItem
// ─────────────────────────────────────────────────────────────────────────────

/// One unit of pipeline work: the root input or a single cell barcode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    name: String,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub source: SourceArtifacts,
    #[serde(default)]
    pub split: SplitArtifacts,
    #[serde(default)]
    pub call: CallArtifacts,
    #[serde(default)]
    pub merge: MergeArtifacts,
}

impl WorkItem {
    /// Create an item with no artifacts assigned.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output_dir: None,
            source: SourceArtifacts::default(),
            split: SplitArtifacts::default(),
            call: CallArtifacts::default(),
            merge: MergeArtifacts::default(),
        }
    }

    /// Create the root item for an input BAM.
    pub fn root(input: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        let mut item = Self::new(ROOT_ITEM_NAME);
        item.output_dir = Some(output_dir.into());
        item.source.original.path = Some(input.into());
        item
    }

    /// Stable identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this is the root item.
    pub fn is_root(&self) -> bool {
        self.name == ROOT_ITEM_NAME
    }

    /// Barcode with the `-1` GEM-well suffix removed, as used in RDS filenames.
    pub fn trimmed_name(&self) -> &str {
        self.name.strip_suffix("-1").unwrap_or(&self.name)
    }

    /// Whether the given job stage succeeded for this item.
    pub fn succeeded(&self, stage: JobStage) -> bool {
        match stage {
            JobStage::Split => self.split.succeeded,
            JobStage::VariantCall => self.call.succeeded,
        }
    }

    /// Record that the given job stage succeeded.
    pub fn mark_succeeded(&mut self, stage: JobStage) {
        match stage {
            JobStage::Split => self.split.succeeded = true,
            JobStage::VariantCall => self.call.succeeded = true,
        }
    }

    /// Read an artifact slot.
    pub fn artifact(&self, field: ArtifactField) -> Option<&Path> {
        self.slot(field).as_deref()
    }

    /// Fill an artifact slot.
    ///
    /// Assigning the path a slot already holds is a no-op; assigning a
    /// different one is an error.
    pub fn assign(&mut self, field: ArtifactField, path: impl Into<PathBuf>) -> Result<()> {
        let requested = path.into();
        let item = self.name.clone();
        let slot = self.slot_mut(field);
        if let Some(existing) = slot.as_ref() {
            if *existing != requested {
                return Err(PipelineError::ArtifactReassigned {
                    item,
                    field: field.name(),
                    existing: existing.clone(),
                    requested,
                });
            }
            return Ok(());
        }
        *slot = Some(requested);
        Ok(())
    }

    /// Check the per-item stage dependencies: indexed ⇒ split, called ⇒
    /// indexed, merged ⇒ called.
    pub fn gates_hold(&self) -> bool {
        (!self.split.indexed || self.split.succeeded)
            && (!self.call.succeeded || self.split.indexed)
            && (!self.merge.succeeded || self.call.succeeded)
    }

    fn slot(&self, field: ArtifactField) -> &Option<PathBuf> {
        match field {
            ArtifactField::SplitJobOut => &self.split.job_out,
            ArtifactField::SplitJobErr => &self.split.job_err,
            ArtifactField::SplitBarcodeFile => &self.split.barcode_file,
            ArtifactField::SplitBam => &self.split.bam,
            ArtifactField::SplitBamIndex => &self.split.bam_index,
            ArtifactField::CallJobOut => &self.call.job_out,
            ArtifactField::CallJobErr => &self.call.job_err,
            ArtifactField::CallOutputDir => &self.call.output_dir,
            ArtifactField::CallCalls => &self.call.calls,
            ArtifactField::CallCoverage => &self.call.coverage,
            ArtifactField::MergeCalls => &self.merge.calls,
            ArtifactField::MergeCoverage => &self.merge.coverage,
        }
    }

    fn slot_mut(&mut self, field: ArtifactField) -> &mut Option<PathBuf> {
        match field {
            ArtifactField::SplitJobOut => &mut self.split.job_out,
            ArtifactField::SplitJobErr => &mut self.split.job_err,
            ArtifactField::SplitBarcodeFile => &mut self.split.barcode_file,
            ArtifactField::SplitBam => &mut self.split.bam,
            ArtifactField::SplitBamIndex => &mut self.split.bam_index,
            ArtifactField::CallJobOut => &mut self.call.job_out,
            ArtifactField::CallJobErr => &mut self.call.job_err,
            ArtifactField::CallOutputDir => &mut self.call.output_dir,
            ArtifactField::CallCalls => &mut self.call.calls,
            ArtifactField::CallCoverage => &mut self.call.coverage,
            ArtifactField::MergeCalls => &mut self.merge.calls,
            ArtifactField::MergeCoverage => &mut self.merge.coverage,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered collection of work items; the single source of truth during a run.
///
/// Serialized transparently as a JSON array so checkpoints stay a plain list
/// of field-labelled records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemRegistry {
    items: Vec<WorkItem>,
}

impl WorkItemRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding only the given root item.
    pub fn with_root(root: WorkItem) -> Self {
        Self { items: vec![root] }
    }

    /// Number of items, root included.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The root item, if the registry has one.
    pub fn root(&self) -> Result<&WorkItem> {
        self.items
            .first()
            .filter(|item| item.is_root())
            .ok_or(PipelineError::MissingRoot)
    }

    /// Mutable access to the root item.
    pub fn root_mut(&mut self) -> Result<&mut WorkItem> {
        self.items
            .first_mut()
            .filter(|item| item.is_root())
            .ok_or(PipelineError::MissingRoot)
    }

    /// Per-barcode items, in discovery order.
    pub fn barcodes(&self) -> &[WorkItem] {
        &self.items[self.barcode_offset()..]
    }

    /// Mutable per-barcode items, in discovery order.
    pub fn barcodes_mut(&mut self) -> &mut [WorkItem] {
        let offset = self.barcode_offset();
        &mut self.items[offset..]
    }

    /// Append one item per barcode, preserving the given order.
    pub fn add_barcodes<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.items.extend(names.into_iter().map(WorkItem::new));
    }

    /// Look up an item by identifier.
    pub fn get(&self, name: &str) -> Option<&WorkItem> {
        self.items.iter().find(|item| item.name() == name)
    }

    /// Iterate over all items, root first.
    pub fn iter(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.iter()
    }

    fn barcode_offset(&self) -> usize {
        match self.items.first() {
            Some(first) if first.is_root() => 1,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_item() {
        let root = WorkItem::root("/data/possorted.bam", "/out/");
        assert!(root.is_root());
        assert_eq!(root.name(), ROOT_ITEM_NAME);
        assert_eq!(
            root.source.original.path.as_deref(),
            Some(Path::new("/data/possorted.bam"))
        );
        assert_eq!(root.output_dir.as_deref(), Some(Path::new("/out/")));
    }

    #[test]
    fn test_trimmed_name_strips_gem_well_suffix() {
        assert_eq!(
            WorkItem::new("AAACCTGAGAAACCAT-1").trimmed_name(),
            "AAACCTGAGAAACCAT"
        );
        assert_eq!(WorkItem::new("AAACCTGAGAAACCAT").trimmed_name(), "AAACCTGAGAAACCAT");
    }

    #[test]
    fn test_assign_once() {
        let mut item = WorkItem::new("ACGT-1");
        item.assign(ArtifactField::SplitBam, "/c/cell_ACGT-1.bam").unwrap();
        // Same path again is fine.
        item.assign(ArtifactField::SplitBam, "/c/cell_ACGT-1.bam").unwrap();
        assert_eq!(
            item.artifact(ArtifactField::SplitBam),
            Some(Path::new("/c/cell_ACGT-1.bam"))
        );

        let err = item
            .assign(ArtifactField::SplitBam, "/elsewhere.bam")
            .unwrap_err();
        match err {
            PipelineError::ArtifactReassigned { item, field, .. } => {
                assert_eq!(item, "ACGT-1");
                assert_eq!(field, "split BAM");
            }
            other => panic!("Expected ArtifactReassigned, got: {other:?}"),
        }
    }

    #[test]
    fn test_mark_succeeded_per_stage() {
        let mut item = WorkItem::new("ACGT-1");
        assert!(!item.succeeded(JobStage::Split));
        item.mark_succeeded(JobStage::Split);
        assert!(item.succeeded(JobStage::Split));
        assert!(!item.succeeded(JobStage::VariantCall));
    }

    #[test]
    fn test_gates() {
        let mut item = WorkItem::new("ACGT-1");
        assert!(item.gates_hold());

        item.call.succeeded = true;
        assert!(!item.gates_hold(), "called without being indexed");

        item.split.succeeded = true;
        item.split.indexed = true;
        assert!(item.gates_hold());

        item.merge.succeeded = true;
        assert!(item.gates_hold());
    }

    #[test]
    fn test_registry_root_and_barcodes() {
        let mut registry = WorkItemRegistry::with_root(WorkItem::root("in.bam", "out/"));
        registry.add_barcodes(["A-1", "B-1", "C-1"]);

        assert_eq!(registry.len(), 4);
        assert!(registry.root().is_ok());
        let names: Vec<_> = registry.barcodes().iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["A-1", "B-1", "C-1"]);
        assert!(registry.get("B-1").is_some());
        assert!(registry.get("Z-1").is_none());
    }

    #[test]
    fn test_registry_without_root() {
        let mut registry = WorkItemRegistry::new();
        assert!(matches!(registry.root(), Err(PipelineError::MissingRoot)));
        registry.add_barcodes(["A-1"]);
        assert!(matches!(registry.root_mut(), Err(PipelineError::MissingRoot)));
        assert_eq!(registry.barcodes().len(), 1);
    }

    #[test]
    fn test_registry_serializes_as_labelled_list() {
        let mut registry = WorkItemRegistry::with_root(WorkItem::root("in.bam", "out/"));
        registry.add_barcodes(["A-1"]);

        let json = serde_json::to_value(&registry).unwrap();
        let list = json.as_array().expect("registry should be a JSON array");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["name"], "MASTER");
        assert_eq!(list[1]["split"]["succeeded"], false);

        let back: WorkItemRegistry = serde_json::from_value(json).unwrap();
        assert_eq!(back, registry);
    }
}
