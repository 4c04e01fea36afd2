//! Error types for the orchestration core.
//!
//! Every variant here is fatal to the run: the controller stops without
//! writing a checkpoint for the stage in progress. Workload failures of
//! individual jobs are not errors; the poller records them on the item.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Checkpoint file could not be read.
    #[error("failed to read checkpoint '{path}': {source}")]
    CheckpointRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Checkpoint file could not be deserialized.
    #[error("malformed checkpoint '{path}': {source}")]
    CheckpointParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Checkpoint file could not be written.
    #[error("failed to write checkpoint '{path}': {source}")]
    CheckpointWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Registry could not be serialized.
    #[error("failed to serialize registry for stage {stage}: {source}")]
    CheckpointSerialize {
        stage: u32,
        source: serde_json::Error,
    },

    /// A checkpoint for this stage already exists and is never rewritten.
    #[error("checkpoint already exists: {0}")]
    CheckpointExists(PathBuf),

    /// Working or output directory could not be created.
    #[error("failed to create directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An external program could not be started at all.
    #[error("failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// The submission command itself exited non-zero.
    #[error("submission '{job}' exited with status {exit_code}: {command}\n{output}")]
    SubmissionFailed {
        job: String,
        command: String,
        exit_code: i32,
        output: String,
    },

    /// An intermediate artifact could not be deleted after a successful job.
    #[error("failed to remove '{path}': {source}")]
    Cleanup {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A per-item input file (e.g. the barcode file for a split) could not be written.
    #[error("failed to write '{path}': {source}")]
    WriteArtifact {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The unique-barcode listing could not be read.
    #[error("failed to read barcode listing '{path}': {source}")]
    BarcodeListing {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A discovered barcode does not have the expected length.
    #[error(
        "barcode '{barcode}' parsed from line {line} ('{raw}') is {actual} bytes, expected {expected}"
    )]
    MalformedBarcode {
        line: usize,
        raw: String,
        barcode: String,
        expected: usize,
        actual: usize,
    },

    /// An artifact path was already assigned to something else.
    #[error("item '{item}' already has {field} = '{existing}', refusing to reassign to '{requested}'")]
    ArtifactReassigned {
        item: String,
        field: &'static str,
        existing: PathBuf,
        requested: PathBuf,
    },

    /// The registry has no root item where a stage requires one.
    #[error("work item registry has no root item")]
    MissingRoot,

    /// The configuration cannot drive a run.
    #[error(transparent)]
    Config(#[from] scvarcall_config::ConfigError),

    /// A stage needs an artifact an earlier stage should have recorded.
    #[error("{item} has no {artifact} recorded; stage {stage} cannot run")]
    MissingArtifact {
        item: String,
        artifact: &'static str,
        stage: u32,
    },
}
