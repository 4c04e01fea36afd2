//! Common test utilities: a simulated batch cluster.
//!
//! The simulated cluster never runs anything. It records every job and
//! fakes the files the real tools would produce, writing queued job reports
//! with the scheduler's terminal and success markers. With a report delay the
//! reports are appended some time after submission, as a real scheduler does.

#![allow(dead_code)]

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::TempDir;

use scvarcall_config::ScvarcallConfig;
use scvarcall_pipeline::{CommandOutput, JobRunner, JobSpec, Launch, Result, RunContext};

pub const SUCCESS_REPORT: &str =
    "Job <1> was submitted from host <head>\nSuccessfully completed.\n\nTerminated at Mon Jan  1 00:00:00 2024\n";
pub const FAILURE_REPORT: &str =
    "Job <1> was submitted from host <head>\nExited with exit code 1.\n\nTerminated at Mon Jan  1 00:00:00 2024\n";

/// `n` distinct 18-byte barcodes (16 bases plus the `-1` GEM-well suffix).
pub fn barcodes(n: usize) -> Vec<String> {
    (0..n)
        .map(|mut i| {
            let mut bases = String::with_capacity(18);
            for _ in 0..16 {
                bases.push(['A', 'C', 'G', 'T'][i % 4]);
                i /= 4;
            }
            bases.push_str("-1");
            bases
        })
        .collect()
}

/// Write a gzipped `CB:Z:` listing.
pub fn write_listing(path: &Path, barcodes: &[String]) {
    let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    for barcode in barcodes {
        writeln!(encoder, "CB:Z:{barcode}").unwrap();
    }
    encoder.finish().unwrap();
}

/// A run context rooted in a temp directory.
pub fn context(dir: &TempDir) -> RunContext {
    RunContext::new(
        dir.path().join("possorted_genome_bam.bam"),
        dir.path().join("out"),
        dir.path().join("qc_barcodes.tsv"),
        &ScvarcallConfig::new(),
    )
    .unwrap()
}

#[derive(Default)]
pub struct SimulatedCluster {
    /// Barcodes emitted by the listing job.
    pub listing: Vec<String>,
    /// Items whose split job terminates without success.
    pub fail_split: HashSet<String>,
    /// Items whose variant-call job terminates without success.
    pub fail_call: HashSet<String>,
    /// Items whose split BAM cannot be indexed.
    pub fail_index: HashSet<String>,
    /// Items whose queued job never writes a report.
    pub silent: HashSet<String>,
    /// Reject the chunk merge submission.
    pub reject_merge: bool,
    /// Append queued job reports this long after submission instead of
    /// writing them immediately.
    pub report_delay: Option<Duration>,
    pub jobs: Mutex<Vec<JobSpec>>,
}

impl SimulatedCluster {
    pub fn with_listing(listing: Vec<String>) -> Self {
        Self {
            listing,
            ..Default::default()
        }
    }

    pub fn jobs(&self) -> Vec<JobSpec> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// Queued jobs whose report name starts with `tag`.
    pub fn queued(&self, tag: &str) -> Vec<JobSpec> {
        self.jobs()
            .into_iter()
            .filter(|job| match &job.launch {
                Launch::Queued { stdout, .. } => file_name(stdout).starts_with(tag),
                _ => false,
            })
            .collect()
    }

    /// Interactive merge submissions.
    pub fn merges(&self) -> Vec<JobSpec> {
        self.jobs().into_iter().filter(is_merge).collect()
    }

    fn run_local(&self, job: &JobSpec) -> i32 {
        match job.args.first().map(String::as_str) {
            Some("index") => {
                let bam = PathBuf::from(&job.args[1]);
                if self.fail_index.iter().any(|name| file_name(&bam) == format!("cell_{name}.bam")) {
                    return 1;
                }
                touch(&PathBuf::from(format!("{}.bai", bam.display())));
                0
            }
            _ => 0,
        }
    }

    fn run_interactive(&self, job: &JobSpec) -> i32 {
        if is_merge(job) {
            if self.reject_merge {
                return 255;
            }
            let dir = PathBuf::from(&job.args[1]);
            let index = &job.args[2];
            touch(&dir.join(format!("chunk_{index}.calls.rds")));
            touch(&dir.join(format!("chunk_{index}.coverage.rds")));
        } else if job.args.iter().any(|a| a == "gzip") {
            write_listing(Path::new(job.args.last().unwrap()), &self.listing);
        } else if let Some(out) = job.args.last() {
            touch(Path::new(out));
        }
        0
    }

    fn run_queued(&self, job: &JobSpec, stdout: &Path, stderr: &Path) -> i32 {
        let report = file_name(stdout);
        let (name, succeeded) = if let Some(name) = strip(&report, "cellsplit_") {
            let out_bam = arg_after(job, "--out-bam");
            touch(Path::new(&out_bam));
            let failed = self.fail_split.contains(&name);
            (name, !failed)
        } else if let Some(name) = strip(&report, "Rvarcall_") {
            let dir = PathBuf::from(&job.args[2]);
            let trimmed = name.strip_suffix("-1").unwrap_or(&name);
            touch(&dir.join(format!("cell_{trimmed}.calls.rds")));
            touch(&dir.join(format!("cell_{trimmed}.coverage.rds")));
            let failed = self.fail_call.contains(&name);
            (name, !failed)
        } else {
            panic!("unexpected queued job: {job:?}");
        };

        if !self.silent.contains(&name) {
            touch(stderr);
            let body = if succeeded { SUCCESS_REPORT } else { FAILURE_REPORT };
            match self.report_delay {
                None => fs::write(stdout, body).unwrap(),
                Some(delay) => {
                    let stdout = stdout.to_path_buf();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        append(&stdout, body);
                    });
                }
            }
        }
        0
    }
}

#[async_trait]
impl JobRunner for SimulatedCluster {
    async fn run(&self, job: &JobSpec) -> Result<CommandOutput> {
        self.jobs.lock().unwrap().push(job.clone());
        let exit_code = match &job.launch {
            Launch::Local => self.run_local(job),
            Launch::Interactive(_) => self.run_interactive(job),
            Launch::Queued { stdout, stderr, .. } => self.run_queued(job, stdout, stderr),
        };
        Ok(CommandOutput::new("", "", exit_code))
    }
}

fn is_merge(job: &JobSpec) -> bool {
    matches!(job.launch, Launch::Interactive(_))
        && job.args.first().is_some_and(|a| a.ends_with("mergeVarcallRds.R"))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn strip(report: &str, prefix: &str) -> Option<String> {
    report
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(".o"))
        .map(String::from)
}

fn arg_after(job: &JobSpec, flag: &str) -> String {
    let pos = job.args.iter().position(|a| a == flag).unwrap();
    job.args[pos + 1].clone()
}

fn append(path: &Path, body: &str) {
    let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
    file.write_all(body.as_bytes()).unwrap();
}

fn touch(path: &Path) {
    fs::write(path, b"").unwrap();
}
