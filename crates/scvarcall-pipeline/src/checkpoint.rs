//! Stage checkpoints.
//!
//! One JSON file per completed stage (`checkpoint_<stage>.json`) holding the
//! full registry. A checkpoint is only ever written after its stage has
//! finished, and is never rewritten; its presence alone tells the controller
//! to skip the stage on the next run.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::item::WorkItemRegistry;

/// Reads and writes stage checkpoints in one directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Create a store rooted at `dir` (normally the run's output directory).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory the checkpoints live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic checkpoint path for a stage.
    pub fn path(&self, stage: u32) -> PathBuf {
        self.dir.join(format!("checkpoint_{stage}.json"))
    }

    /// Whether a checkpoint for `stage` is present (and is not a directory).
    pub fn exists(&self, stage: u32) -> bool {
        self.path(stage).is_file()
    }

    /// Load the registry snapshot written after `stage`.
    pub fn load(&self, stage: u32) -> Result<WorkItemRegistry> {
        let path = self.path(stage);
        let contents = fs::read_to_string(&path).map_err(|source| {
            PipelineError::CheckpointRead {
                path: path.clone(),
                source,
            }
        })?;
        let registry = serde_json::from_str(&contents)
            .map_err(|source| PipelineError::CheckpointParse { path, source })?;
        debug!(stage, "Checkpoint loaded");
        Ok(registry)
    }

    /// Persist the registry as the checkpoint for `stage`.
    ///
    /// The snapshot is written to a temporary file and renamed into place so
    /// a crash mid-write never leaves a truncated checkpoint that would later
    /// short-circuit the stage.
    pub fn save(&self, stage: u32, registry: &WorkItemRegistry) -> Result<PathBuf> {
        let path = self.path(stage);
        if path.exists() {
            return Err(PipelineError::CheckpointExists(path));
        }

        let json = serde_json::to_string_pretty(registry)
            .map_err(|source| PipelineError::CheckpointSerialize { stage, source })?;

        let temp_path = self.dir.join(format!(".checkpoint_{stage}.json.tmp"));
        fs::write(&temp_path, json).map_err(|source| PipelineError::CheckpointWrite {
            path: temp_path.clone(),
            source,
        })?;
        fs::rename(&temp_path, &path).map_err(|source| PipelineError::CheckpointWrite {
            path: path.clone(),
            source,
        })?;

        info!(stage, path = %path.display(), "Checkpoint saved");
        Ok(path)
    }
}
