use std::process::Command;

use anyhow::{Context, Result};
use tracing::debug;

/// Captured result of a finished subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Narrow seam for every external tool invocation (acme.sh, nginx, pgrep,
/// systemctl, ...). Decision logic never touches `std::process` directly, so
/// tests substitute a runner returning scripted exit codes and output.
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion, capturing stdout and stderr.
    ///
    /// `Err` means the command could not be executed at all (typically not
    /// installed); a command that ran and exited non-zero is `Ok` with a
    /// non-zero `code`.
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

/// Runs commands on the host.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        debug!("running command: {program} {}", args.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("failed to execute {program}"))?;
        let out = CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !out.success() {
            debug!("{program} exited with {}: {}", out.code, out.stderr.trim());
        }
        Ok(out)
    }
}
