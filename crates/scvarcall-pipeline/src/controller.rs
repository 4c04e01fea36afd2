//! Stage controller.
//!
//! Drives stages 1 through 8 strictly in order. A stage whose checkpoint
//! already exists is not executed; the registry is reloaded from that
//! checkpoint instead. Any error stops the run before the current stage's
//! checkpoint is written, so the next run repeats that stage from scratch.

use std::collections::BTreeMap;

use tracing::info;

use crate::checkpoint::CheckpointStore;
use crate::context::RunContext;
use crate::error::Result;
use crate::item::WorkItemRegistry;
use crate::runner::JobRunner;
use crate::stages::Stage;
use crate::submit::JobSubmitter;

/// Lifecycle of one stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    NotStarted,
    Running,
    Checkpointed,
}

/// How a stage was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageDisposition {
    /// The body ran and a new checkpoint was written.
    Executed,
    /// A checkpoint from an earlier run was loaded.
    Resumed,
}

pub struct StageController<'a> {
    ctx: &'a RunContext,
    submitter: JobSubmitter<'a>,
    store: CheckpointStore,
    registry: WorkItemRegistry,
    states: BTreeMap<Stage, StageState>,
}

impl<'a> StageController<'a> {
    /// Create a controller whose checkpoints live in the run's output
    /// directory.
    pub fn new(ctx: &'a RunContext, runner: &'a dyn JobRunner) -> Self {
        Self {
            ctx,
            submitter: JobSubmitter::new(runner),
            store: CheckpointStore::new(&ctx.output_dir),
            registry: WorkItemRegistry::new(),
            states: Stage::ALL
                .into_iter()
                .map(|stage| (stage, StageState::NotStarted))
                .collect(),
        }
    }

    /// Run every stage in order.
    pub async fn run(&mut self) -> Result<()> {
        for stage in Stage::ALL {
            self.run_stage(stage).await?;
        }
        info!(items = self.registry.barcodes().len(), "Pipeline complete");
        Ok(())
    }

    /// Run (or resume) a single stage.
    pub async fn run_stage(&mut self, stage: Stage) -> Result<StageDisposition> {
        let number = stage.number();

        if self.store.exists(number) {
            self.registry = self.store.load(number)?;
            self.states.insert(stage, StageState::Checkpointed);
            info!("Checkpoint exists for stage {number}, loading progress");
            return Ok(StageDisposition::Resumed);
        }

        info!("Starting stage {number}");
        info!(stage = number, "{}", stage.description());
        self.states.insert(stage, StageState::Running);

        stage
            .execute(self.ctx, &self.submitter, &mut self.registry)
            .await?;

        self.store.save(number, &self.registry)?;
        self.states.insert(stage, StageState::Checkpointed);
        Ok(StageDisposition::Executed)
    }

    pub fn state(&self, stage: Stage) -> StageState {
        self.states
            .get(&stage)
            .copied()
            .unwrap_or(StageState::NotStarted)
    }

    /// The registry as of the last completed stage.
    pub fn registry(&self) -> &WorkItemRegistry {
        &self.registry
    }

    pub fn into_registry(self) -> WorkItemRegistry {
        self.registry
    }
}
