//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [tools]        # executable locations
//! [scheduler]    # batch submission settings
//! [pipeline]     # chunking and polling
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. a project-local
/// override that only moves `samtools`) can be loaded and merged. Use the
/// accessor methods to read a section with built-in defaults applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScvarcallConfig {
    /// External tool locations.
    pub tools: Option<ToolsConfig>,

    /// Batch scheduler settings.
    pub scheduler: Option<SchedulerConfig>,

    /// Chunking and polling settings.
    pub pipeline: Option<PipelineSection>,
}

impl ScvarcallConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: ScvarcallConfig) {
        if other.tools.is_some() {
            self.tools = other.tools;
        }

        if other.scheduler.is_some() {
            self.scheduler = other.scheduler;
        }

        if other.pipeline.is_some() {
            self.pipeline = other.pipeline;
        }
    }

    /// Tool locations, falling back to the built-in defaults.
    pub fn tools(&self) -> ToolsConfig {
        self.tools.clone().unwrap_or_default()
    }

    /// Scheduler settings, falling back to the built-in defaults.
    pub fn scheduler(&self) -> SchedulerConfig {
        self.scheduler.clone().unwrap_or_default()
    }

    /// Pipeline settings, falling back to the built-in defaults.
    pub fn pipeline(&self) -> PipelineSection {
        self.pipeline.clone().unwrap_or_default()
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let tools = self.tools();
        for (field, path) in [
            ("tools.samtools", &tools.samtools),
            ("tools.rscript", &tools.rscript),
            ("tools.umi_tools", &tools.umi_tools),
            ("tools.subset_bam", &tools.subset_bam),
        ] {
            if path.as_os_str().is_empty() {
                return Err(invalid(field, "executable path is empty"));
            }
        }

        let scheduler = self.scheduler();
        if scheduler.submit_command.trim().is_empty() {
            return Err(invalid("scheduler.submit_command", "must not be empty"));
        }
        if scheduler.threads == 0 {
            return Err(invalid("scheduler.threads", "must be at least 1"));
        }

        let pipeline = self.pipeline();
        if pipeline.chunk_size == 0 {
            return Err(invalid("pipeline.chunk_size", "must be at least 1"));
        }
        if pipeline.barcode_length == 0 {
            return Err(invalid("pipeline.barcode_length", "must be at least 1"));
        }
        if pipeline.poll_interval_secs == 0 {
            return Err(invalid("pipeline.poll_interval_secs", "must be at least 1"));
        }
        if pipeline.poll_timeout_secs == Some(0) {
            return Err(invalid(
                "pipeline.poll_timeout_secs",
                "must be at least 1 (omit it to wait indefinitely)",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────────────────────────────────────

/// Executable locations for the external programs the pipeline drives.
///
/// ```toml
/// [tools]
/// samtools = "/opt/samtools/bin/samtools"
/// rscript = "/opt/R/bin/Rscript"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// `samtools` (view, quickcheck, index).
    pub samtools: PathBuf,
    /// `Rscript` for the calling and merge scripts.
    pub rscript: PathBuf,
    /// `umi_tools` for UMI deduplication.
    pub umi_tools: PathBuf,
    /// 10x `subset-bam`.
    pub subset_bam: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            samtools: PathBuf::from("/software/sciops/pkgg/samtools/1.10.0/bin/samtools"),
            rscript: PathBuf::from("/software/R-4.1.0/bin/Rscript"),
            umi_tools: PathBuf::from("/software/teamtrynka/conda/trynka-base/bin/umi_tools"),
            subset_bam: PathBuf::from("subset-bam"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Batch scheduler submission settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Submission program (LSF `bsub` compatible flags are emitted).
    pub submit_command: String,
    /// Thread count requested by the root-item jobs.
    pub threads: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            submit_command: "bsub".to_string(),
            threads: 4,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Chunking, polling and script settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Barcodes per chunk (one working directory each).
    pub chunk_size: usize,
    /// Expected barcode length in bytes, including the `-1` suffix.
    pub barcode_length: usize,
    /// Seconds between completion poll passes.
    pub poll_interval_secs: u64,
    /// Give up on jobs that have not terminated after this many seconds.
    /// Unset means wait indefinitely.
    pub poll_timeout_secs: Option<u64>,
    /// R script that calls variants for one cell.
    pub call_script: PathBuf,
    /// R script that merges a chunk's per-cell results.
    pub merge_script: PathBuf,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            barcode_length: 18,
            poll_interval_secs: 5,
            poll_timeout_secs: None,
            call_script: PathBuf::from("callVars.R"),
            merge_script: PathBuf::from("mergeVarcallRds.R"),
        }
    }
}
