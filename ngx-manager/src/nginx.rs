use std::{path::PathBuf, sync::Arc, time::Duration};

use fs_err as fs;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{cmd::CommandRunner, config::ManagerConfig};

#[derive(Debug, thiserror::Error)]
pub enum NginxError {
    #[error("nginx configuration test failed: {0}")]
    ConfigTest(String),
    #[error("failed to reload nginx: {0}")]
    Reload(String),
    #[error("failed to start nginx: {0}")]
    Start(String),
    #[error("failed to run {program}: {source:#}")]
    Spawn {
        program: &'static str,
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct NginxStatus {
    pub running: bool,
    pub config_ok: bool,
    pub version: Option<String>,
}

/// Drives the host nginx through its command line and, where available,
/// the init system. Every probe and action degrades through a chain of
/// strategies so the controller works inside minimal containers (no
/// systemd, sometimes no pgrep) as well as full hosts.
#[derive(Clone)]
pub struct NginxController {
    runner: Arc<dyn CommandRunner>,
    pid_file: PathBuf,
    stop_grace_period: Duration,
}

impl NginxController {
    pub fn new(config: &ManagerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            pid_file: config.pid_file.clone(),
            stop_grace_period: config.stop_grace_period,
        }
    }

    /// Whether an nginx master process is alive. Tries pgrep, then the pid
    /// file against /proc, then systemd. When every probe is unavailable
    /// the answer is `false`.
    pub fn is_running(&self) -> bool {
        if let Ok(out) = self.runner.run("pgrep", &["-x", "nginx"]) {
            return out.success();
        }
        if let Ok(pid) = fs::read_to_string(&self.pid_file) {
            if let Ok(pid) = pid.trim().parse::<u32>() {
                return PathBuf::from(format!("/proc/{pid}")).exists();
            }
        }
        if let Ok(out) = self
            .runner
            .run("systemctl", &["is-active", "--quiet", "nginx"])
        {
            return out.success();
        }
        false
    }

    /// Validate the on-disk configuration without touching the running
    /// process.
    pub fn test(&self) -> Result<(), NginxError> {
        let out = self
            .runner
            .run("nginx", &["-t"])
            .map_err(|e| NginxError::Spawn {
                program: "nginx",
                source: e,
            })?;
        if out.success() {
            Ok(())
        } else {
            // nginx -t reports findings on stderr.
            Err(NginxError::ConfigTest(out.stderr.trim().to_string()))
        }
    }

    /// Reload configuration in the running process. Falls back from the
    /// nginx binary to systemd to SysV service.
    pub fn reload(&self) -> Result<(), NginxError> {
        let attempts: [(&str, &[&str]); 3] = [
            ("nginx", &["-s", "reload"]),
            ("systemctl", &["reload", "nginx"]),
            ("service", &["nginx", "reload"]),
        ];
        let mut failures = vec![];
        for (program, args) in attempts {
            match self.runner.run(program, args) {
                Ok(out) if out.success() => {
                    info!("reloaded nginx via {program}");
                    return Ok(());
                }
                Ok(out) => failures.push(format!("{program}: {}", out.stderr.trim())),
                Err(err) => failures.push(format!("{program}: {err:#}")),
            }
        }
        Err(NginxError::Reload(failures.join("; ")))
    }

    pub fn start(&self) -> Result<(), NginxError> {
        let attempts: [(&str, &[&str]); 3] = [
            ("nginx", &[]),
            ("systemctl", &["start", "nginx"]),
            ("service", &["nginx", "start"]),
        ];
        let mut failures = vec![];
        for (program, args) in attempts {
            match self.runner.run(program, args) {
                Ok(out) if out.success() => {
                    info!("started nginx via {program}");
                    return Ok(());
                }
                Ok(out) => failures.push(format!("{program}: {}", out.stderr.trim())),
                Err(err) => failures.push(format!("{program}: {err:#}")),
            }
        }
        Err(NginxError::Start(failures.join("; ")))
    }

    /// Ask nginx to quit gracefully, then force-kill whatever survives the
    /// grace period. Succeeds when no process is left either way.
    pub async fn stop(&self) -> Result<(), NginxError> {
        if !self.is_running() {
            debug!("nginx is not running, nothing to stop");
            return Ok(());
        }
        if let Ok(out) = self.runner.run("nginx", &["-s", "quit"]) {
            if !out.success() {
                warn!("nginx -s quit failed: {}", out.stderr.trim());
            }
        }
        let deadline = tokio::time::Instant::now() + self.stop_grace_period;
        while self.is_running() {
            if tokio::time::Instant::now() >= deadline {
                warn!("nginx did not exit within grace period, killing");
                let _ = self.runner.run("pkill", &["-9", "-x", "nginx"]);
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(())
    }

    pub fn status(&self) -> NginxStatus {
        NginxStatus {
            running: self.is_running(),
            config_ok: self.test().is_ok(),
            version: self.version(),
        }
    }

    fn version(&self) -> Option<String> {
        // nginx prints its version banner to stderr.
        let out = self.runner.run("nginx", &["-v"]).ok()?;
        let banner = if out.stderr.trim().is_empty() {
            out.stdout
        } else {
            out.stderr
        };
        banner
            .trim()
            .strip_prefix("nginx version: ")
            .map(str::to_string)
            .or_else(|| Some(banner.trim().to_string()).filter(|s| !s.is_empty()))
    }
}
