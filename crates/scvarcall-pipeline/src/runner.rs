//! External process execution.
//!
//! A [`JobSpec`] describes one invocation: the workload program and its
//! arguments, plus how it is launched (directly, as a blocking interactive
//! scheduler job, or as a queued scheduler job with output redirects).
//! [`JobRunner`] is the seam between the orchestration logic and the real
//! processes; [`ProcessRunner`] is the production implementation.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{PipelineError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Job description
// ─────────────────────────────────────────────────────────────────────────────

/// Memory and slot request for a scheduler job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRequest {
    /// Memory reservation and limit in MB.
    pub memory_mb: u32,
    /// Number of job slots (threads); scheduler default when unset.
    pub slots: Option<u32>,
}

impl ResourceRequest {
    /// Request `memory_mb` of memory and the scheduler's default slot count.
    pub const fn memory(memory_mb: u32) -> Self {
        Self {
            memory_mb,
            slots: None,
        }
    }

    /// Also request `slots` job slots.
    pub const fn with_slots(mut self, slots: u32) -> Self {
        self.slots = Some(slots);
        self
    }

    fn push_args(&self, argv: &mut Vec<String>) {
        argv.push("-R".to_string());
        argv.push(format!(
            "select[mem>{mem}] rusage[mem={mem}]",
            mem = self.memory_mb
        ));
        argv.push("-M".to_string());
        argv.push(self.memory_mb.to_string());
        if let Some(slots) = self.slots {
            argv.push("-n".to_string());
            argv.push(slots.to_string());
        }
    }
}

/// How a job is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launch {
    /// Run the program directly in the foreground.
    Local,
    /// Submit to the scheduler and block until the job exits (`-I`).
    Interactive(ResourceRequest),
    /// Submit to the scheduler with output redirects; returns once the
    /// scheduler accepts the job.
    Queued {
        resources: ResourceRequest,
        stdout: PathBuf,
        stderr: PathBuf,
    },
}

/// One external invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Short label for logs (e.g. `split AAACCTG-1`).
    pub label: String,
    /// Workload program.
    pub program: String,
    /// Workload arguments, passed through verbatim. For scheduler jobs the
    /// scheduler joins them into the remote shell command, so pipe and
    /// redirect tokens are honoured there.
    pub args: Vec<String>,
    /// Launch mode.
    pub launch: Launch,
}

impl JobSpec {
    /// A foreground helper command (no scheduler).
    pub fn local(label: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args,
            launch: Launch::Local,
        }
    }

    /// A blocking scheduler job.
    pub fn interactive(
        label: impl Into<String>,
        resources: ResourceRequest,
        program: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args,
            launch: Launch::Interactive(resources),
        }
    }

    /// A queued scheduler job whose stdout lands in `stdout`.
    pub fn queued(
        label: impl Into<String>,
        resources: ResourceRequest,
        stdout: impl Into<PathBuf>,
        stderr: impl Into<PathBuf>,
        program: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args,
            launch: Launch::Queued {
                resources,
                stdout: stdout.into(),
                stderr: stderr.into(),
            },
        }
    }

    /// Whether this job goes through the batch scheduler.
    pub fn is_scheduled(&self) -> bool {
        !matches!(self.launch, Launch::Local)
    }

    /// The workload command line, without any scheduler wrapper.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Full argument vector, starting with the executable to spawn.
    pub fn argv(&self, submit_command: &str) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 12);
        match &self.launch {
            Launch::Local => {}
            Launch::Interactive(resources) => {
                argv.push(submit_command.to_string());
                argv.push("-I".to_string());
                resources.push_args(&mut argv);
            }
            Launch::Queued {
                resources,
                stdout,
                stderr,
            } => {
                argv.push(submit_command.to_string());
                argv.push("-o".to_string());
                argv.push(stdout.display().to_string());
                argv.push("-e".to_string());
                argv.push(stderr.display().to_string());
                resources.push_args(&mut argv);
            }
        }
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

/// Output from a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code (0 = success, -1 when killed by a signal).
    pub exit_code: i32,
    /// Whether the command succeeded (exit code 0).
    pub success: bool,
}

impl CommandOutput {
    /// Create a new command output.
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            success: exit_code == 0,
            exit_code,
        }
    }

    /// Combine stdout and stderr for display.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n\n--- stderr ---\n{}", self.stdout, self.stderr)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runners
// ─────────────────────────────────────────────────────────────────────────────

/// Executes job specs.
///
/// Returns `Err` only when the process could not be started; a non-zero
/// exit is reported through [`CommandOutput::success`] so callers can decide
/// whether it is fatal.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &JobSpec) -> Result<CommandOutput>;
}

/// Runs jobs as real child processes, wrapping scheduled jobs in the
/// configured submission command.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    submit_command: String,
}

impl ProcessRunner {
    /// Create a runner that submits scheduled jobs through `submit_command`.
    pub fn new(submit_command: impl Into<String>) -> Self {
        Self {
            submit_command: submit_command.into(),
        }
    }
}

#[async_trait]
impl JobRunner for ProcessRunner {
    async fn run(&self, job: &JobSpec) -> Result<CommandOutput> {
        let argv = job.argv(&self.submit_command);
        let (program, args) = argv
            .split_first()
            .map(|(p, a)| (p.clone(), a.to_vec()))
            .unwrap_or_else(|| (job.program.clone(), Vec::new()));

        tracing::debug!(job = %job.label, command = %argv.join(" "), "Launching");

        let output = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| PipelineError::Spawn { program, source })?;

        Ok(CommandOutput::new(
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
            output.status.code().unwrap_or(-1),
        ))
    }
}
