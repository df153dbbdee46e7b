// # Script Runner
//
// Runs the workloader wrapper scripts and keeps a log of every step for the
// run report. A script that exits with status 0 but leaves its output file
// missing or empty is treated as failed.
//
// In stub mode no script runs: exports are copied from the stub directory
// and imports are only written.

use chrono::Utc;
use dna_core::report::{StepOutcome, StepRecord};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tracing::{debug, error, info};

/// Runs scripts from a bin directory, recording each step
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    bin_dir: PathBuf,
    work_dir: PathBuf,
    steps: Arc<Mutex<Vec<StepRecord>>>,
}

impl ScriptRunner {
    /// Create a runner executing scripts from `bin_dir` inside `work_dir`
    pub fn new(bin_dir: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            work_dir: work_dir.into(),
            steps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Run a script to completion
    ///
    /// # Returns
    ///
    /// - `Ok(stdout)`: the script exited with status 0
    /// - `Err(message)`: spawn failure or non-zero exit, with stderr
    pub async fn run(&self, step: &str, script: &str, args: &[String]) -> Result<String, String> {
        let started = Utc::now();
        let program = self.bin_dir.join(script);
        debug!("{}: {} {}", step, program.display(), args.join(" "));

        let output = match Command::new(&program)
            .args(args)
            .current_dir(&self.work_dir)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                let message = format!("{}: cannot run {}: {}", step, program.display(), e);
                error!("{}", message);
                self.record(step, started, StepOutcome::Failed(message.clone()), "not started");
                return Err(message);
            }
        };

        let code = output.status.code().map_or("signal".to_string(), |c| c.to_string());
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        info!("{} rc={}", step, code);

        if output.status.success() {
            self.record(step, started, StepOutcome::Succeeded, format!("rc={}", code));
            Ok(stdout)
        } else {
            let message = format!("{} failed with rc={}: {}", step, code, last_line(&stderr, &stdout));
            error!("{}", message);
            self.record(step, started, StepOutcome::Failed(message.clone()), format!("rc={}", code));
            Err(message)
        }
    }

    /// Run an export script and check it produced `output`
    pub async fn export(&self, step: &str, script: &str, args: &[String], output: &Path) -> Result<(), String> {
        self.run(step, script, args).await?;
        ensure_output(step, output).await
    }

    /// Copy `file_name` from the stub directory to `output`
    pub async fn copy_stub(&self, step: &str, stub_dir: &Path, file_name: &str, output: &Path) -> Result<(), String> {
        let started = Utc::now();
        let source = stub_dir.join(file_name);
        match tokio::fs::copy(&source, output).await {
            Ok(bytes) => {
                info!("{}: copied stub {} ({} bytes)", step, source.display(), bytes);
                self.record(step, started, StepOutcome::Succeeded, format!("stub {}", file_name));
                Ok(())
            }
            Err(e) => {
                let message = format!("{}: cannot copy stub {}: {}", step, source.display(), e);
                error!("{}", message);
                self.record(step, started, StepOutcome::Failed(message.clone()), "stub");
                Err(message)
            }
        }
    }

    /// Record a step that was deliberately not executed
    pub fn skip(&self, step: &str, detail: impl Into<String>) {
        self.record(step, Utc::now(), StepOutcome::Skipped, detail);
    }

    /// Every step recorded so far
    pub fn steps(&self) -> Vec<StepRecord> {
        self.steps.lock().map(|steps| steps.clone()).unwrap_or_default()
    }

    fn record(
        &self,
        name: &str,
        started_at: chrono::DateTime<Utc>,
        outcome: StepOutcome,
        detail: impl Into<String>,
    ) {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push(StepRecord {
                name: name.to_string(),
                started_at,
                finished_at: Utc::now(),
                outcome,
                detail: detail.into(),
            });
        }
    }
}

/// Fail when `path` is missing or empty
pub async fn ensure_output(step: &str, path: &Path) -> Result<(), String> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.len() > 0 => Ok(()),
        _ => {
            let message = format!("{} reported success but did not generate {}", step, path.display());
            error!("{}", message);
            Err(message)
        }
    }
}

fn last_line<'a>(stderr: &'a str, stdout: &'a str) -> &'a str {
    let text = if stderr.is_empty() { stdout } else { stderr };
    text.lines().last().unwrap_or_default()
}
